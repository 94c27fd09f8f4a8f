use std::fmt::{self, Display, Formatter};

use tabled::builder::Builder;
use tabled::settings::Style;

use super::painter::Painter;

/// Rounded-border table rendered through `Display`.
#[derive(Debug)]
pub(crate) struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub(crate) fn grid(
        headers: impl IntoIterator<Item = impl Into<String>>,
        rows: Vec<Vec<String>>,
    ) -> Self {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows,
        }
    }

    /// Two columns: muted attribute labels and their values.
    pub(crate) fn attributes(painter: &Painter, rows: Vec<(String, String)>) -> Self {
        let records = rows
            .into_iter()
            .map(|(label, value)| vec![painter.muted(label), value])
            .collect();
        Self::grid(["attribute", "value"], records)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl Display for Table {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut builder = Builder::default();
        builder.push_record(&self.headers);
        for row in &self.rows {
            builder.push_record(row);
        }
        let mut table = builder.build();
        table.with(Style::rounded());
        write!(f, "{table}")
    }
}

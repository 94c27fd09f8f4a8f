use std::future::Future;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

/// Spinner drawn on stderr while a network operation runs.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Spinner {
    enabled: bool,
}

impl Spinner {
    pub(crate) fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Awaits `operation`, showing `message` until it finishes.
    pub(crate) async fn run<Fut, T>(&self, message: impl Into<String>, operation: Fut) -> T
    where
        Fut: Future<Output = T>,
    {
        if !self.enabled {
            return operation.await;
        }

        let bar = ProgressBar::new_spinner();
        bar.set_style(style());
        bar.set_message(message.into());
        bar.enable_steady_tick(Duration::from_millis(90));
        let output = operation.await;
        bar.finish_and_clear();
        output
    }
}

fn style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.cyan.bold} {msg} {elapsed:.dim}")
        .unwrap_or_else(|_error| ProgressStyle::default_spinner())
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
}

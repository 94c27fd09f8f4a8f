use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bon::Builder;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};
use time::OffsetDateTime;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::{PollError, UpdateError};
use crate::hw::{
    AttributeModelTable, CloudTransport, Device, DeviceStatusSnapshot, LanTransport,
};
use crate::utils::error_chain;

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// What happens to a device whose LAN poll fails.
#[derive(
    Debug, Clone, Copy, Default, Eq, PartialEq, Display, EnumIter, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum LanFailurePolicy {
    /// Keep the last good snapshot, flagged stale, until the next cycle.
    #[default]
    MarkStale,
    /// Try the cloud in the same cycle before falling back to stale data.
    CloudFallback,
}

/// Devices managed by the coordinator, keyed by device identifier.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct DeviceInventory {
    devices: BTreeMap<String, Device>,
}

impl DeviceInventory {
    /// Builds an inventory; later duplicates replace earlier ones.
    #[must_use]
    pub fn new(devices: impl IntoIterator<Item = Device>) -> Self {
        let mut inventory = Self::default();
        for device in devices {
            inventory.insert(device);
        }
        inventory
    }

    /// Adds or replaces a device, returning the replaced record.
    pub fn insert(&mut self, device: Device) -> Option<Device> {
        self.devices.insert(device.device_id().to_string(), device)
    }

    /// Returns devices ordered by identifier.
    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    #[must_use]
    pub fn get(&self, device_id: &str) -> Option<&Device> {
        self.devices.get(device_id)
    }

    /// Records LAN addresses found by discovery for known devices.
    ///
    /// Returns how many devices changed address. Unknown identifiers are
    /// ignored; devices that did not answer keep their previous address.
    pub fn apply_discovery(&mut self, found: &HashMap<String, IpAddr>) -> usize {
        let mut changed = 0;
        for (device_id, ip) in found {
            let Some(device) = self.devices.get_mut(device_id) else {
                debug!(%device_id, "ignoring discovered device outside the inventory");
                continue;
            };
            if device.lan_ip() != Some(*ip) {
                device.set_lan_ip(Some(*ip));
                changed += 1;
            }
        }
        changed
    }

    /// Sets the LAN address of a known device.
    ///
    /// Returns `false` when the identifier is not in the inventory.
    pub fn assign_lan_ip(&mut self, device_id: &str, lan_ip: IpAddr) -> bool {
        match self.devices.get_mut(device_id) {
            Some(device) => {
                device.set_lan_ip(Some(lan_ip));
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

/// Receives every published status report.
pub trait StatusSink: Send + Sync {
    fn publish(&self, report: &StatusReport);
}

/// Availability of one device in a report.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DeviceAvailability<'a> {
    /// Fresh data from this cycle, or stale data kept from an earlier one.
    Available(&'a DeviceStatusSnapshot),
    /// No data has ever been read; carries the latest failure if there was one.
    Unavailable(Option<&'a str>),
}

/// Outcome of one update cycle across the inventory.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct StatusReport {
    snapshots: BTreeMap<String, DeviceStatusSnapshot>,
    failures: BTreeMap<String, String>,
    completed_at: OffsetDateTime,
}

impl StatusReport {
    pub(crate) fn new(
        snapshots: BTreeMap<String, DeviceStatusSnapshot>,
        failures: BTreeMap<String, String>,
        completed_at: OffsetDateTime,
    ) -> Self {
        Self {
            snapshots,
            failures,
            completed_at,
        }
    }

    /// Snapshots by device identifier, fresh and stale.
    #[must_use]
    pub fn snapshots(&self) -> &BTreeMap<String, DeviceStatusSnapshot> {
        &self.snapshots
    }

    /// Failure reasons by device identifier for polls that failed this cycle.
    #[must_use]
    pub fn failures(&self) -> &BTreeMap<String, String> {
        &self.failures
    }

    /// Looks up one device.
    #[must_use]
    pub fn device(&self, device_id: &str) -> DeviceAvailability<'_> {
        match self.snapshots.get(device_id) {
            Some(snapshot) => DeviceAvailability::Available(snapshot),
            None => DeviceAvailability::Unavailable(self.failures.get(device_id).map(String::as_str)),
        }
    }

    /// Number of snapshots carried over from earlier cycles.
    #[must_use]
    pub fn stale_count(&self) -> usize {
        self.snapshots
            .values()
            .filter(|snapshot| snapshot.is_stale())
            .count()
    }

    #[must_use]
    pub fn completed_at(&self) -> OffsetDateTime {
        self.completed_at
    }
}

/// Why [`UpdateCoordinator::run`] returned.
#[derive(Debug, Clone, Eq, PartialEq, derive_more::Display)]
pub enum RunStopReason {
    #[display("reached max cycles ({_0})")]
    ReachedLimit(usize),
    #[display("cancelled")]
    Cancelled,
}

/// Summary of a polling loop.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RunSummary {
    cycles: usize,
    failed_cycles: usize,
    stop_reason: RunStopReason,
}

impl RunSummary {
    /// Returns the number of completed cycles, failed ones included.
    #[must_use]
    pub fn cycles(&self) -> usize {
        self.cycles
    }

    /// Returns the number of cycles that produced no data.
    #[must_use]
    pub fn failed_cycles(&self) -> usize {
        self.failed_cycles
    }

    #[must_use]
    pub fn stop_reason(&self) -> &RunStopReason {
        &self.stop_reason
    }
}

/// Polls every device in the inventory and keeps the aggregate status.
///
/// Devices are polled concurrently each cycle. A failed poll reuses the
/// device's last good snapshot, flagged stale; a cycle only fails when no
/// device has any data at all.
///
/// Cycles may overlap. Each one is numbered when it starts, and a cycle that
/// finishes after a later one never replaces newer snapshots or publishes its
/// report.
#[derive(Builder)]
pub struct UpdateCoordinator {
    inventory: Arc<RwLock<DeviceInventory>>,
    models: Arc<AttributeModelTable>,
    lan: Arc<dyn LanTransport>,
    cloud: Option<Arc<dyn CloudTransport>>,
    #[builder(default)]
    lan_failure_policy: LanFailurePolicy,
    #[builder(default)]
    sinks: Vec<Arc<dyn StatusSink>>,
    #[builder(skip)]
    cycles_started: AtomicU64,
    #[builder(skip)]
    state: RwLock<MergeState>,
    #[builder(skip = watch::Sender::new(None))]
    reports: watch::Sender<Option<Arc<StatusReport>>>,
}

impl UpdateCoordinator {
    /// Returns the shared inventory.
    #[must_use]
    pub fn inventory(&self) -> &Arc<RwLock<DeviceInventory>> {
        &self.inventory
    }

    #[must_use]
    pub fn lan_failure_policy(&self) -> LanFailurePolicy {
        self.lan_failure_policy
    }

    /// Runs one update cycle and publishes the result.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::NoData`] when every poll failed and no device
    /// has an earlier snapshot, including when the inventory is empty.
    #[instrument(skip(self), level = "info", fields(policy = %self.lan_failure_policy))]
    pub async fn refresh(&self) -> Result<Arc<StatusReport>, UpdateError> {
        let cycle = self.cycles_started.fetch_add(1, Ordering::Relaxed) + 1;
        let devices: Vec<Device> = self.inventory.read().await.devices().cloned().collect();
        let total = devices.len();

        let mut polls = JoinSet::new();
        let mut pending = HashMap::with_capacity(total);
        for device in devices {
            let context = self.poll_context();
            let device_id = device.device_id().to_string();
            let handle = polls.spawn(async move { context.poll(&device).await });
            pending.insert(handle.id(), device_id);
        }

        let mut outcomes = Vec::with_capacity(total);
        while let Some(joined) = polls.join_next_with_id().await {
            let (task_id, outcome) = match joined {
                Ok((task_id, outcome)) => (task_id, outcome),
                Err(error) => (error.id(), Err(PollError::Task(error))),
            };
            if let Some(device_id) = pending.remove(&task_id) {
                outcomes.push((device_id, outcome));
            }
        }

        let report = self.merge(cycle, outcomes, total).await?;
        info!(
            cycle,
            devices = report.snapshots.len(),
            stale = report.stale_count(),
            failed = report.failures.len(),
            "status updated"
        );
        Ok(report)
    }

    /// Returns the most recently published report.
    #[must_use]
    pub fn latest(&self) -> Option<Arc<StatusReport>> {
        self.reports.borrow().clone()
    }

    /// Streams reports published after this call.
    pub fn subscribe(&self) -> impl Stream<Item = Arc<StatusReport>> + use<> {
        WatchStream::from_changes(self.reports.subscribe()).filter_map(|report| report)
    }

    /// Refreshes on a fixed interval until cancelled or `max_cycles` is hit.
    ///
    /// The first cycle starts immediately. Failed cycles are passed to
    /// `on_cycle` and do not stop the loop.
    #[instrument(
        skip(self, cancel, on_cycle),
        level = "debug",
        fields(interval = ?interval, ?max_cycles)
    )]
    pub async fn run<F>(
        &self,
        interval: Duration,
        max_cycles: Option<usize>,
        cancel: CancellationToken,
        mut on_cycle: F,
    ) -> RunSummary
    where
        F: FnMut(usize, &Result<Arc<StatusReport>, UpdateError>),
    {
        let mut ticker = tokio::time::interval(interval.max(MIN_POLL_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cycles = 0usize;
        let mut failed_cycles = 0usize;

        let stop_reason = loop {
            if let Some(limit) = max_cycles
                && cycles >= limit
            {
                break RunStopReason::ReachedLimit(limit);
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => break RunStopReason::Cancelled,
                _instant = ticker.tick() => {}
            }
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => break RunStopReason::Cancelled,
                outcome = self.refresh() => outcome,
            };

            cycles += 1;
            if let Err(error) = &outcome {
                failed_cycles += 1;
                warn!(cycle = cycles, error = %error, "update cycle produced no data");
            }
            on_cycle(cycles, &outcome);
        };

        RunSummary {
            cycles,
            failed_cycles,
            stop_reason,
        }
    }

    fn poll_context(&self) -> PollContext {
        PollContext {
            models: Arc::clone(&self.models),
            lan: Arc::clone(&self.lan),
            cloud: self.cloud.clone(),
            policy: self.lan_failure_policy,
        }
    }

    /// Folds one cycle's outcomes into the shared state and publishes the
    /// report unless a later cycle already has.
    async fn merge(
        &self,
        cycle: u64,
        outcomes: Vec<(String, Result<DeviceStatusSnapshot, PollError>)>,
        total: usize,
    ) -> Result<Arc<StatusReport>, UpdateError> {
        let mut state = self.state.write().await;
        let mut snapshots = BTreeMap::new();
        let mut failures = BTreeMap::new();

        for (device_id, outcome) in outcomes {
            match outcome {
                Ok(snapshot) => {
                    state.remember(cycle, &device_id, &snapshot);
                    snapshots.insert(device_id, snapshot);
                }
                Err(error) => {
                    let reason = error_chain(&error);
                    match state.last_good.get(&device_id) {
                        Some((_cycle, previous)) => {
                            warn!(%device_id, error = %reason, "poll failed; reusing last known status");
                            snapshots.insert(device_id.clone(), previous.clone().into_stale());
                        }
                        None => {
                            warn!(%device_id, error = %reason, "poll failed; device has no status yet");
                        }
                    }
                    failures.insert(device_id, reason);
                }
            }
        }

        if snapshots.is_empty() {
            return Err(UpdateError::NoData {
                failed: failures.len(),
                total,
            });
        }

        let report = Arc::new(StatusReport::new(
            snapshots,
            failures,
            OffsetDateTime::now_utc(),
        ));
        if cycle > state.published {
            state.published = cycle;
            self.reports.send_replace(Some(Arc::clone(&report)));
            for sink in &self.sinks {
                sink.publish(&report);
            }
        } else {
            debug!(cycle, published = state.published, "newer cycle already published");
        }
        Ok(report)
    }
}

/// Snapshots and publication progress shared by overlapping cycles.
#[derive(Debug, Default)]
struct MergeState {
    last_good: HashMap<String, (u64, DeviceStatusSnapshot)>,
    published: u64,
}

impl MergeState {
    fn remember(&mut self, cycle: u64, device_id: &str, snapshot: &DeviceStatusSnapshot) {
        match self.last_good.get(device_id) {
            Some((known, _snapshot)) if *known > cycle => {
                debug!(%device_id, cycle, newer = *known, "keeping snapshot from a later cycle");
            }
            _ => {
                self.last_good
                    .insert(device_id.to_string(), (cycle, snapshot.clone()));
            }
        }
    }
}

/// Shared handles one poll task needs.
#[derive(Clone)]
struct PollContext {
    models: Arc<AttributeModelTable>,
    lan: Arc<dyn LanTransport>,
    cloud: Option<Arc<dyn CloudTransport>>,
    policy: LanFailurePolicy,
}

impl PollContext {
    #[instrument(
        skip(self, device),
        level = "debug",
        fields(device_id = %device.device_id(), lan_ip = ?device.lan_ip())
    )]
    async fn poll(&self, device: &Device) -> Result<DeviceStatusSnapshot, PollError> {
        let model = self
            .models
            .get(device.product_key())
            .ok_or_else(|| PollError::UnknownProduct {
                product_key: device.product_key().to_string(),
            })?;

        if let Some(ip) = device.lan_ip() {
            let lan_error = match self.lan.poll_status(device.device_id(), ip, &model).await {
                Ok(snapshot) => return Ok(snapshot),
                Err(error) => error,
            };
            return match (&self.cloud, self.policy) {
                (Some(cloud), LanFailurePolicy::CloudFallback) => {
                    debug!(error = %lan_error, "LAN poll failed; trying the cloud");
                    cloud
                        .device_status(device.device_id(), &model)
                        .await
                        .map_err(|cloud_error| PollError::LanAndCloud {
                            lan: lan_error,
                            cloud: cloud_error,
                        })
                }
                _ => Err(PollError::Lan(lan_error)),
            };
        }

        match &self.cloud {
            Some(cloud) => Ok(cloud.device_status(device.device_id(), &model).await?),
            None => Err(PollError::TransportSelectionFailure {
                device_id: device.device_id().to_string(),
            }),
        }
    }
}

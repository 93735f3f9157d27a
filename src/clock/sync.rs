//! Berkeley Clock Synchronization
//!
//! The coordinator polls every backup's physical clock, compensates each
//! reading with half the round trip, discards readings that stray more
//! than `max_deviation_ms` from the median and averages the rest
//! (including its own zero deviation). Each backup is then told the
//! correction it must apply; the coordinator applies its own.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use futures::future::join_all;
use tokio::sync::{watch, Notify};

use super::{LogicalClock, PhysicalClock};
use crate::membership::MembershipDirectory;
use crate::network::PeerTransport;
use crate::replication::{required, Envelope, Payload, PeerKind};
use crate::error::{Error, Result};

/// Clock synchronization settings
#[derive(Debug, Clone)]
pub struct ClockSyncConfig {
    /// Whether rounds run at all
    pub enabled: bool,
    /// Interval between timed rounds
    pub interval: Duration,
    /// Also run a round after this many processed requests (0 disables)
    pub every_requests: u64,
    /// Readings further than this from the median are ignored
    pub max_deviation_ms: i64,
    /// Timeout of each poll and adjust exchange
    pub timeout: Duration,
}

impl Default for ClockSyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(30),
            every_requests: 10,
            max_deviation_ms: 1000,
            timeout: Duration::from_secs(2),
        }
    }
}

/// Summary of one synchronization round
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncRound {
    /// Backups polled
    pub polled: usize,
    /// Backups that answered the poll
    pub responded: usize,
    /// Readings (self included) that survived outlier rejection
    pub accepted: usize,
    /// Agreed correction for the coordinator
    pub average_ms: i64,
    /// Correction sent to each responsive backup
    pub corrections: Vec<(String, i64)>,
}

/// Drives Berkeley rounds while this node is the coordinator
pub struct ClockSynchronizer {
    directory: Arc<MembershipDirectory>,
    transport: Arc<dyn PeerTransport>,
    logical: Arc<LogicalClock>,
    physical: Arc<PhysicalClock>,
    config: ClockSyncConfig,
    requests: AtomicU64,
    trigger: Notify,
}

impl ClockSynchronizer {
    pub fn new(
        directory: Arc<MembershipDirectory>,
        transport: Arc<dyn PeerTransport>,
        logical: Arc<LogicalClock>,
        physical: Arc<PhysicalClock>,
        config: ClockSyncConfig,
    ) -> Self {
        Self {
            directory,
            transport,
            logical,
            physical,
            config,
            requests: AtomicU64::new(0),
            trigger: Notify::new(),
        }
    }

    /// Count a processed client request; every `every_requests` one
    /// wakes the synchronizer.
    pub fn record_request(&self) -> u64 {
        let count = self.requests.fetch_add(1, Ordering::Relaxed) + 1;
        if self.config.enabled && self.config.every_requests > 0 && count % self.config.every_requests == 0 {
            tracing::debug!("{} requests processed, triggering clock sync", count);
            self.trigger.notify_one();
        }
        count
    }

    /// Requests counted so far
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Run timed and request-triggered rounds until shutdown
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        if !self.config.enabled {
            tracing::info!("Clock synchronization disabled");
            return;
        }

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.trigger.notified() => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            if let Some(round) = self.run_round().await {
                tracing::info!(
                    "Clock sync: {}/{} backups responded, {} readings accepted, local correction {} ms",
                    round.responded,
                    round.polled,
                    round.accepted,
                    round.average_ms
                );
            }
        }

        tracing::info!("Clock synchronizer stopped");
    }

    /// Run one round. Returns `None` unless this node is primary with
    /// at least one backup.
    pub async fn run_round(&self) -> Option<SyncRound> {
        let view = self.directory.snapshot().await;
        if !view.is_primary() || view.backups().is_empty() {
            return None;
        }

        let backups = view.backups().to_vec();
        let polls = backups.iter().map(|peer| self.poll(peer));
        let readings: Vec<(String, i64)> = join_all(polls)
            .await
            .into_iter()
            .zip(backups.iter())
            .filter_map(|(result, peer)| match result {
                Ok(deviation) => Some((peer.clone(), deviation)),
                Err(e) => {
                    tracing::warn!("Clock poll of {} failed: {}", peer, e);
                    None
                }
            })
            .collect();

        let mut deviations: Vec<i64> = readings.iter().map(|(_, d)| *d).collect();
        deviations.push(0);
        let (average_ms, accepted) = fault_tolerant_average(&deviations, self.config.max_deviation_ms);

        let corrections: Vec<(String, i64)> = readings
            .iter()
            .map(|(peer, deviation)| (peer.clone(), average_ms.saturating_sub(*deviation)))
            .collect();

        let adjustments = corrections.iter().map(|(peer, offset)| self.adjust(peer, *offset));
        for (result, (peer, _)) in join_all(adjustments).await.into_iter().zip(corrections.iter()) {
            if let Err(e) = result {
                tracing::warn!("Clock adjust of {} failed: {}", peer, e);
            }
        }

        if average_ms != 0 {
            self.physical.adjust(average_ms);
        }

        Some(SyncRound {
            polled: backups.len(),
            responded: readings.len(),
            accepted,
            average_ms,
            corrections,
        })
    }

    /// Poll one backup. Returns its deviation from the local clock.
    async fn poll(&self, peer: &str) -> Result<i64> {
        let request = Envelope::new(PeerKind::Clock.as_service(), Payload::stamped(self.logical.tick()));

        let started = Instant::now();
        let reply = self.transport.request(peer, request, self.config.timeout).await?;
        let rtt = started.elapsed().as_millis() as i64;
        self.logical.observe(reply.data.clock);

        if reply.is_error() {
            return Err(Error::Network(
                reply.data.description.unwrap_or_else(|| "clock poll rejected".into()),
            ));
        }

        let remote = required(&reply.data.time, "time", "clock")?;
        Ok(remote.saturating_add(rtt / 2).saturating_sub(self.physical.now_ms()))
    }

    /// Send a correction to one backup
    async fn adjust(&self, peer: &str, offset: i64) -> Result<()> {
        let mut payload = Payload::stamped(self.logical.tick());
        payload.offset = Some(offset);
        let request = Envelope::new(PeerKind::ClockAdjust.as_service(), payload);

        let reply = self.transport.request(peer, request, self.config.timeout).await?;
        self.logical.observe(reply.data.clock);

        if !reply.is_ok() {
            return Err(Error::Network(
                reply.data.description.unwrap_or_else(|| "clock adjust rejected".into()),
            ));
        }
        Ok(())
    }
}

/// Average of the readings within `max_deviation_ms` of their median.
///
/// Returns the average and how many readings it was taken over. The
/// median of an even count is the lower middle value, so the result is
/// always drawn from real readings.
pub fn fault_tolerant_average(deviations: &[i64], max_deviation_ms: i64) -> (i64, usize) {
    if deviations.is_empty() {
        return (0, 0);
    }

    let mut sorted = deviations.to_vec();
    sorted.sort_unstable();
    let median = sorted[(sorted.len() - 1) / 2];

    let accepted: Vec<i64> = sorted
        .into_iter()
        .filter(|d| d.saturating_sub(median).saturating_abs() <= max_deviation_ms)
        .collect();

    // The median itself always passes the filter
    let sum: i128 = accepted.iter().map(|d| i128::from(*d)).sum();
    ((sum / accepted.len() as i128) as i64, accepted.len())
}

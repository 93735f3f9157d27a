//! Replication Coordinator
//!
//! On the primary, pushes every applied operation to each backup listed
//! in the membership snapshot taken when the job was created. Backups
//! that fail or time out are counted, never retried.

use std::sync::Arc;
use futures::future::join_all;

use super::{Envelope, OpKind, Operation, ReplicationConfig, ReplicationMode};
use crate::clock::LogicalClock;
use crate::membership::MembershipDirectory;
use crate::network::PeerTransport;
use crate::error::{Error, Result};

/// One operation to push to a fixed set of backups
#[derive(Debug, Clone)]
pub struct ReplicationJob {
    pub op: Operation,
    /// Backups at the time the job was created
    pub targets: Vec<String>,
    /// Logical clock carried by the replication request
    pub clock: u64,
}

/// Tally of one fan-out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationReport {
    pub op: OpKind,
    pub clock: u64,
    pub targets: usize,
    pub acknowledged: Vec<String>,
    pub failed: Vec<String>,
}

impl ReplicationReport {
    /// Acknowledged and target counts
    pub fn ratio(&self) -> (usize, usize) {
        (self.acknowledged.len(), self.targets)
    }
}

/// What `replicate` did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicationOutcome {
    /// Not primary, or no backups
    Skipped,
    /// Handed to a background task (async mode)
    Dispatched { targets: usize },
    /// Fan-out finished
    Completed(ReplicationReport),
}

/// Fans operations out from the primary to its backups
pub struct ReplicationCoordinator {
    directory: Arc<MembershipDirectory>,
    transport: Arc<dyn PeerTransport>,
    clock: Arc<LogicalClock>,
    config: ReplicationConfig,
}

impl ReplicationCoordinator {
    pub fn new(
        directory: Arc<MembershipDirectory>,
        transport: Arc<dyn PeerTransport>,
        clock: Arc<LogicalClock>,
        config: ReplicationConfig,
    ) -> Self {
        Self {
            directory,
            transport,
            clock,
            config,
        }
    }

    /// Replicate an already applied operation.
    ///
    /// Issues no RPC at all unless this node is primary. Only quorum mode
    /// can return an error, and then the local change stays applied.
    pub async fn replicate(&self, op: &Operation) -> Result<ReplicationOutcome> {
        let view = self.directory.snapshot().await;
        if !view.is_primary() || view.backups().is_empty() {
            return Ok(ReplicationOutcome::Skipped);
        }

        let job = ReplicationJob {
            op: op.clone(),
            targets: view.backups().to_vec(),
            clock: self.clock.tick(),
        };

        if self.config.mode == ReplicationMode::Async {
            let targets = job.targets.len();
            let transport = Arc::clone(&self.transport);
            let clock = Arc::clone(&self.clock);
            let timeout = self.config.timeout;
            tokio::spawn(async move {
                let report = fan_out(transport.as_ref(), &clock, job, timeout).await;
                log_report(&report);
            });
            return Ok(ReplicationOutcome::Dispatched { targets });
        }

        let report = fan_out(self.transport.as_ref(), &self.clock, job, self.config.timeout).await;
        log_report(&report);

        if self.config.mode == ReplicationMode::Quorum {
            let required = self.config.min_acks.min(report.targets);
            if report.acknowledged.len() < required {
                return Err(Error::QuorumNotReached {
                    reached: report.acknowledged.len(),
                    required,
                });
            }
        }

        Ok(ReplicationOutcome::Completed(report))
    }
}

/// Send the job to every target concurrently and wait for all outcomes
async fn fan_out(
    transport: &dyn PeerTransport,
    clock: &LogicalClock,
    job: ReplicationJob,
    timeout: std::time::Duration,
) -> ReplicationReport {
    let kind = job.op.kind();
    let request = Envelope::new(kind.replicate_service(), job.op.to_payload(job.clock));

    let sends = job.targets.iter().map(|target| {
        // Each backup gets its own correlation id
        let request = Envelope::new(request.service.clone(), request.data.clone());
        async move {
            let result = transport.request(target, request, timeout).await;
            (target.clone(), result)
        }
    });

    let mut acknowledged = Vec::new();
    let mut failed = Vec::new();
    for (target, result) in join_all(sends).await {
        match result {
            Ok(reply) => {
                clock.observe(reply.data.clock);
                if reply.is_ok() {
                    acknowledged.push(target);
                } else {
                    tracing::warn!(
                        "Backup {} rejected {}: {}",
                        target,
                        kind,
                        reply.data.description.as_deref().unwrap_or("no description")
                    );
                    failed.push(target);
                }
            }
            Err(e) => {
                tracing::warn!("Replication of {} to {} failed: {}", kind, target, e);
                failed.push(target);
            }
        }
    }

    ReplicationReport {
        op: kind,
        clock: job.clock,
        targets: job.targets.len(),
        acknowledged,
        failed,
    }
}

fn log_report(report: &ReplicationReport) {
    let (acked, targets) = report.ratio();
    if report.failed.is_empty() {
        tracing::debug!("Replicated {} to {}/{} backups", report.op, acked, targets);
    } else {
        tracing::warn!(
            "Replicated {} to {}/{} backups (failed: {})",
            report.op,
            acked,
            targets,
            report.failed.join(", ")
        );
    }
}

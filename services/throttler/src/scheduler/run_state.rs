//! Per-run counters.

use crate::model::InstanceId;

/// Outcome of a single scheduler run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Online instances seen at the start of the run.
    pub instances_total: usize,
    /// Instances evaluated before the run ended or was cut short.
    pub instances_processed: usize,
    /// Skipped because a compile job was already running for them.
    pub already_compiling: usize,
    /// Skipped because the last deployment is the latest upstream revision.
    pub already_current: usize,
    /// Instances a deployment was triggered for, in trigger order.
    pub triggered: Vec<InstanceId>,
    /// Instances skipped because a lookup or request failed.
    pub failed: usize,
    /// Active compile jobs counted at the start of the run.
    pub active_jobs_at_start: usize,
    /// Whether iteration stopped early because capacity ran out.
    pub aborted_at_capacity: bool,
    /// The shuffled order instances were visited in.
    pub order: Vec<InstanceId>,
}

impl RunReport {
    pub fn triggered_count(&self) -> usize {
        self.triggered.len()
    }
}

/// Mutable state of one run. Never outlives [`super::Throttler::run`].
#[derive(Debug)]
pub(crate) struct RunState {
    report: RunReport,
    active_jobs: usize,
    max_jobs: usize,
}

impl RunState {
    pub(crate) fn new(order: Vec<InstanceId>, active_jobs: usize, max_jobs: usize) -> Self {
        Self {
            report: RunReport {
                instances_total: order.len(),
                active_jobs_at_start: active_jobs,
                order,
                ..RunReport::default()
            },
            active_jobs,
            max_jobs,
        }
    }

    pub(crate) fn has_capacity(&self) -> bool {
        self.active_jobs < self.max_jobs
    }

    pub(crate) fn active_jobs(&self) -> usize {
        self.active_jobs
    }

    pub(crate) fn record_processed(&mut self) {
        self.report.instances_processed += 1;
    }

    pub(crate) fn record_compiling(&mut self) {
        self.report.already_compiling += 1;
    }

    pub(crate) fn record_current(&mut self) {
        self.report.already_current += 1;
    }

    pub(crate) fn record_failed(&mut self) {
        self.report.failed += 1;
    }

    pub(crate) fn record_abort(&mut self) {
        self.report.aborted_at_capacity = true;
    }

    /// Count a triggered deployment against capacity.
    pub(crate) fn record_trigger(&mut self, instance: InstanceId) {
        self.active_jobs += 1;
        self.report.triggered.push(instance);
    }

    pub(crate) fn finish(self) -> RunReport {
        self.report
    }
}

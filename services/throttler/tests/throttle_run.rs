//! Scheduler runs against in-memory collaborators.
//!
//! Covers the admission rules end to end:
//! 1. Already compiling instances are skipped without any revision lookup
//! 2. Current instances are skipped, stale ones triggered
//! 3. Triggers never push active jobs past the cap
//! 4. Per-instance failures do not end the run

use std::collections::HashSet;
use std::sync::Arc;

use rstest::rstest;
use throttle_scheduler::model::{Instance, InstanceId};
use throttle_scheduler::scheduler::{SchedulerError, ThrottleSettings, Throttler};
use throttle_scheduler::testing::{instance, MemoryStore, RecordingOrchestrator, StaticSourceControl};
use throttle_scheduler::RunReport;
use throttle_tgs::UserId;

const A: InstanceId = InstanceId(1);
const B: InstanceId = InstanceId(2);
const C: InstanceId = InstanceId(3);

struct Harness {
    store: Arc<MemoryStore>,
    source: Arc<StaticSourceControl>,
    orchestrator: Arc<RecordingOrchestrator>,
}

impl Harness {
    fn new(instances: Vec<Instance>) -> Self {
        Self {
            store: Arc::new(MemoryStore::new(instances)),
            source: Arc::new(StaticSourceControl::new()),
            orchestrator: Arc::new(RecordingOrchestrator::new()),
        }
    }

    /// Deployments show up as active jobs on the next run.
    fn reflecting(instances: Vec<Instance>) -> Self {
        let store = Arc::new(MemoryStore::new(instances));
        Self {
            orchestrator: Arc::new(RecordingOrchestrator::reflecting(Arc::clone(&store))),
            store,
            source: Arc::new(StaticSourceControl::new()),
        }
    }

    fn throttler(&self, max_compile_jobs: usize) -> Throttler {
        self.build(max_compile_jobs, false)
    }

    fn build(&self, max_compile_jobs: usize, dry_run: bool) -> Throttler {
        Throttler::new(
            self.store.clone(),
            self.source.clone(),
            self.orchestrator.clone(),
            UserId(1),
            ThrottleSettings {
                max_compile_jobs,
                compile_job_description: "Compile active repository code".to_string(),
                dry_run,
            },
        )
    }
}

/// A current at sha1, B behind (sha2 -> sha3), C never deployed.
fn abc() -> (Harness, Vec<Instance>) {
    let instances = vec![instance(1, "a"), instance(2, "b"), instance(3, "c")];
    let harness = Harness::new(instances.clone());

    harness.store.set_last_success(A, "sha1");
    harness.source.set_upstream(&instances[0], "sha1");
    harness.store.set_last_success(B, "sha2");
    harness.source.set_upstream(&instances[1], "sha3");
    harness.source.set_upstream(&instances[2], "sha9");

    (harness, instances)
}

fn sorted(ids: &[InstanceId]) -> Vec<InstanceId> {
    let mut ids = ids.to_vec();
    ids.sort();
    ids
}

#[tokio::test]
async fn test_stale_instances_triggered_within_capacity() {
    let (harness, _) = abc();
    let mut throttler = harness.throttler(2).with_seed(7);

    let report = throttler.run().await.unwrap();

    assert_eq!(sorted(&report.triggered), vec![B, C]);
    assert_eq!(sorted(&harness.orchestrator.deploys()), vec![B, C]);
    assert_eq!(report.instances_total, 3);
    assert_eq!(report.already_compiling, 0);
    assert_eq!(report.failed, 0);

    // Once B and C are triggered the cap is hit, so A is only evaluated
    // when it was not visited last.
    if report.order.last() == Some(&A) {
        assert!(report.aborted_at_capacity);
        assert_eq!(report.instances_processed, 2);
        assert_eq!(report.already_current, 0);
    } else {
        assert!(!report.aborted_at_capacity);
        assert_eq!(report.instances_processed, 3);
        assert_eq!(report.already_current, 1);
    }
}

#[tokio::test]
async fn test_full_capacity_triggers_nothing() {
    let (harness, _) = abc();
    harness.store.add_active_job(A);
    let mut throttler = harness.throttler(1);

    let report = throttler.run().await.unwrap();

    assert!(report.triggered.is_empty());
    assert!(report.aborted_at_capacity);
    assert_eq!(report.instances_processed, 0);
    assert_eq!(report.active_jobs_at_start, 1);
    assert!(harness.store.revision_lookups().is_empty());
    assert!(harness.orchestrator.updates().is_empty());
    assert!(harness.orchestrator.deploys().is_empty());
}

#[tokio::test]
async fn test_compiling_instance_is_not_evaluated() {
    let (harness, instances) = abc();
    harness.store.add_active_job(B);
    let mut throttler = harness.throttler(10);

    let report = throttler.run().await.unwrap();

    assert_eq!(report.already_compiling, 1);
    assert_eq!(report.triggered, vec![C]);
    assert!(!harness.store.revision_lookups().contains(&B));
    assert!(!harness.source.fetches().contains(&instances[1].path));
    assert!(harness.orchestrator.updates().iter().all(|(id, _)| *id != B));
}

#[tokio::test]
async fn test_current_instance_is_not_triggered() {
    let instances = vec![instance(1, "a")];
    let harness = Harness::new(instances.clone());
    harness.store.set_last_success(A, "sha1");
    harness.source.set_upstream(&instances[0], "sha1");

    let report = harness.throttler(5).run().await.unwrap();

    assert_eq!(report.already_current, 1);
    assert!(report.triggered.is_empty());
    assert!(harness.orchestrator.deploys().is_empty());
}

#[tokio::test]
async fn test_never_deployed_instance_is_triggered() {
    let instances = vec![instance(3, "c")];
    let harness = Harness::new(instances.clone());
    harness.source.set_upstream(&instances[0], "sha9");

    let report = harness.throttler(1).run().await.unwrap();

    assert_eq!(report.triggered, vec![C]);
    assert_eq!(harness.orchestrator.deploys(), vec![C]);
}

#[rstest]
#[case(1, 0)]
#[case(3, 1)]
#[case(4, 4)]
#[case(5, 2)]
#[tokio::test]
async fn test_triggers_never_exceed_spare_capacity(#[case] max: usize, #[case] active: usize) {
    for seed in 0..10 {
        let instances: Vec<Instance> = (1..=8).map(|i| instance(i, &format!("i{i}"))).collect();
        let harness = Harness::new(instances.clone());
        for inst in &instances {
            harness.source.set_upstream(inst, "new");
        }
        // Jobs on instances that are not online still count against the cap.
        for job in 0..active {
            harness.store.add_active_job(InstanceId(100 + job as i64));
        }

        let report = harness.throttler(max).with_seed(seed).run().await.unwrap();

        assert_eq!(report.triggered_count(), max.saturating_sub(active));
        assert!(harness.orchestrator.deploys().len() <= max.saturating_sub(active));
    }
}

#[tokio::test]
async fn test_second_run_triggers_nothing() {
    let instances = vec![instance(1, "a"), instance(2, "b"), instance(3, "c")];
    let harness = Harness::reflecting(instances.clone());
    harness.store.set_last_success(A, "sha1");
    harness.source.set_upstream(&instances[0], "sha1");
    harness.store.set_last_success(B, "sha2");
    harness.source.set_upstream(&instances[1], "sha3");
    harness.source.set_upstream(&instances[2], "sha9");

    let first = harness.throttler(100).run().await.unwrap();
    let second = harness.throttler(100).run().await.unwrap();

    assert_eq!(sorted(&first.triggered), vec![B, C]);
    assert!(second.triggered.is_empty());
    assert_eq!(second.already_compiling, 2);
    assert_eq!(second.already_current, 1);
    assert_eq!(second.active_jobs_at_start, 2);
    assert_eq!(harness.orchestrator.deploys().len(), 2);
}

#[tokio::test]
async fn test_visiting_order_is_a_varying_permutation() {
    let instances: Vec<Instance> = (1..=6).map(|i| instance(i, &format!("i{i}"))).collect();
    let harness = Harness::new(instances.clone());
    for inst in &instances {
        harness.store.set_last_success(inst.id, "same");
        harness.source.set_upstream(inst, "same");
    }
    let expected: Vec<InstanceId> = instances.iter().map(|i| i.id).collect();

    let mut orders = HashSet::new();
    for _ in 0..20 {
        let report: RunReport = harness.throttler(10).run().await.unwrap();
        assert_eq!(sorted(&report.order), expected);
        assert_eq!(report.already_current, instances.len());
        orders.insert(report.order);
    }

    assert!(orders.len() > 1, "visiting order never changed");
}

#[tokio::test]
async fn test_update_resubmits_active_test_merges() {
    let instances = vec![instance(2, "b")];
    let harness = Harness::new(instances.clone());
    harness.store.set_last_success(B, "sha2");
    harness.source.set_upstream(&instances[0], "sha3");
    harness.source.set_branch(&instances[0], "release");
    harness
        .orchestrator
        .set_test_merges(B, &[(5, "fix"), (7, "feature")]);

    harness.throttler(1).run().await.unwrap();

    let updates = harness.orchestrator.updates();
    assert_eq!(updates.len(), 1);
    let (id, update) = &updates[0];
    assert_eq!(*id, B);
    assert_eq!(update.branch, "release");

    let merges: Vec<(i64, Option<&str>)> = update
        .test_merges
        .iter()
        .map(|m| (m.number, m.comment.as_deref()))
        .collect();
    assert_eq!(merges, vec![(5, Some("fix")), (7, Some("feature"))]);
    assert!(update.test_merges.iter().all(|m| m.target_commit_sha.is_none()));
}

#[tokio::test]
async fn test_instance_failures_do_not_stop_the_run() {
    let instances: Vec<Instance> = (1..=4).map(|i| instance(i, &format!("i{i}"))).collect();
    let harness = Harness::new(instances.clone());
    // 1: history lookup fails, 2: remote unreachable, 3: deploy rejected
    harness.store.fail_revision_lookup(InstanceId(1));
    harness.source.set_upstream(&instances[0], "new");
    harness.source.set_upstream(&instances[2], "new");
    harness.orchestrator.fail_deploy(InstanceId(3));
    harness.source.set_upstream(&instances[3], "new");

    let report = harness.throttler(10).run().await.unwrap();

    assert_eq!(report.failed, 3);
    assert_eq!(report.triggered, vec![InstanceId(4)]);
    assert_eq!(report.instances_processed, 4);
    assert_eq!(harness.orchestrator.deploys(), vec![InstanceId(4)]);
}

#[tokio::test]
async fn test_listing_failure_aborts_run() {
    let (harness, _) = abc();
    harness.store.fail_listing();

    let err = harness.throttler(2).run().await.unwrap_err();

    assert!(matches!(err, SchedulerError::ListInstances(_)));
    assert!(harness.orchestrator.updates().is_empty());
}

#[tokio::test]
async fn test_dry_run_counts_without_requests() {
    let (harness, _) = abc();
    let mut throttler = harness.build(1, true);

    let report = throttler.run().await.unwrap();

    assert_eq!(report.triggered_count(), 1);
    assert!(harness.orchestrator.updates().is_empty());
    assert!(harness.orchestrator.deploys().is_empty());
}

//! End-to-end lifecycle tests over a scripted scanner adapter and the
//! in-memory store.
//!
//! These exercise the full state machine — discovery submission, both poll
//! loops, result fetch, finding sync, finalization — plus the terminal
//! re-entry guard, phase ordering, cancellation, and the lifecycle timeout.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use scanforge::models::scan::{CreateScan, Scan, ScanStatus, ScannerKind};
use scanforge::scanners::{
    LiveStatus, Page, PhaseKind, PhaseProgress, RawFinding, ResourceKind, ScannerAdapter,
    ScannerError, SubmitParams,
};
use scanforge::services::lifecycle::{LifecycleRunner, RunningScans};
use scanforge::store::memory::MemoryStore;
use scanforge::store::ScanStore;

const DISCOVERY_ID: &str = "d-1";
const ANALYSIS_ID: &str = "a-1";

#[derive(Debug, Clone, PartialEq)]
enum Call {
    SubmitDiscovery,
    SubmitAnalysis,
    PollDiscovery,
    PollAnalysis,
    FetchResults,
}

/// Scripted adapter: each phase serves a queue of poll outcomes, with the
/// final entry repeating forever. Every vendor call is recorded.
#[derive(Default)]
struct MockAdapter {
    discovery_polls: Mutex<VecDeque<PhaseProgress>>,
    analysis_polls: Mutex<VecDeque<PhaseProgress>>,
    results: Vec<RawFinding>,
    calls: Mutex<Vec<Call>>,
    external_calls: AtomicUsize,
    fail_discovery_submit: bool,
    fail_results: bool,
}

impl MockAdapter {
    fn new(discovery: Vec<PhaseProgress>, analysis: Vec<PhaseProgress>) -> Self {
        Self {
            discovery_polls: Mutex::new(discovery.into()),
            analysis_polls: Mutex::new(analysis.into()),
            ..Self::default()
        }
    }

    fn percents(discovery: &[u8], analysis: &[u8]) -> Self {
        Self::new(
            discovery.iter().map(|&p| PhaseProgress::from_percent(p)).collect(),
            analysis.iter().map(|&p| PhaseProgress::from_percent(p)).collect(),
        )
    }

    fn with_results(mut self, results: Vec<RawFinding>) -> Self {
        self.results = results;
        self
    }

    fn record(&self, call: Call) {
        self.external_calls.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push(call);
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn call_count(&self) -> usize {
        self.external_calls.load(Ordering::SeqCst)
    }

    fn pop(queue: &Mutex<VecDeque<PhaseProgress>>) -> PhaseProgress {
        let mut queue = queue.lock().unwrap();
        if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue.front().cloned().unwrap_or(PhaseProgress::Complete)
        }
    }
}

#[async_trait]
impl ScannerAdapter for MockAdapter {
    fn kind(&self) -> ScannerKind {
        ScannerKind::DastB
    }

    async fn fetch_page(
        &self,
        _resource: ResourceKind,
        _cursor: Option<&str>,
    ) -> Result<Page<serde_json::Value>, ScannerError> {
        Err(ScannerError::Rejected("not scripted".to_string()))
    }

    async fn submit_phase(
        &self,
        _target: &str,
        phase: PhaseKind,
        params: &SubmitParams,
    ) -> Result<String, ScannerError> {
        match phase {
            PhaseKind::Discovery => {
                self.record(Call::SubmitDiscovery);
                if self.fail_discovery_submit {
                    return Err(ScannerError::Rejected("vendor returned HTTP 503".to_string()));
                }
                Ok(DISCOVERY_ID.to_string())
            }
            PhaseKind::Analysis => {
                self.record(Call::SubmitAnalysis);
                assert_eq!(
                    params.discovery_external_id.as_deref(),
                    Some(DISCOVERY_ID),
                    "analysis submission must carry the discovery id"
                );
                Ok(ANALYSIS_ID.to_string())
            }
        }
    }

    async fn poll_phase(&self, external_id: &str) -> Result<PhaseProgress, ScannerError> {
        match external_id {
            DISCOVERY_ID => {
                self.record(Call::PollDiscovery);
                Ok(Self::pop(&self.discovery_polls))
            }
            ANALYSIS_ID => {
                self.record(Call::PollAnalysis);
                Ok(Self::pop(&self.analysis_polls))
            }
            other => Err(ScannerError::Decode(format!("unknown phase id: {other}"))),
        }
    }

    async fn fetch_results(
        &self,
        external_id: &str,
        _target: &str,
    ) -> Result<Vec<RawFinding>, ScannerError> {
        self.record(Call::FetchResults);
        assert_eq!(external_id, ANALYSIS_ID);
        if self.fail_results {
            return Err(ScannerError::Transport("connection reset".to_string()));
        }
        Ok(self.results.clone())
    }

    async fn fetch_live_statuses(&self) -> Result<Vec<LiveStatus>, ScannerError> {
        Err(ScannerError::Rejected("not scripted".to_string()))
    }

    fn map_status(&self, _vendor_status: &str) -> Option<ScanStatus> {
        None
    }
}

fn raw_finding(url: &str, name: Option<&str>, risk: &str) -> RawFinding {
    RawFinding {
        url: Some(url.to_string()),
        name: name.map(String::from),
        risk: Some(risk.to_string()),
        location: None,
    }
}

fn runner(store: &Arc<MemoryStore>, adapter: &Arc<MockAdapter>) -> LifecycleRunner {
    LifecycleRunner::new(
        store.clone(),
        store.clone(),
        adapter.clone(),
        Duration::from_millis(1),
        Duration::from_secs(60),
    )
}

async fn new_scan(store: &Arc<MemoryStore>) -> Scan {
    store
        .insert(&CreateScan {
            company_id: Uuid::new_v4(),
            kind: ScannerKind::DastB,
            target: "https://example.test".to_string(),
            created_by: Uuid::new_v4(),
        })
        .await
        .unwrap()
}

/// The phase-ordering invariant: analysis is never touched before the
/// discovery poll loop finishes, and results are never fetched before the
/// analysis poll loop does.
fn assert_phase_ordering(calls: &[Call]) {
    assert_eq!(calls.first(), Some(&Call::SubmitDiscovery));

    let submit_analysis = calls
        .iter()
        .position(|c| *c == Call::SubmitAnalysis)
        .expect("analysis was submitted");
    assert!(
        calls[..submit_analysis]
            .iter()
            .skip(1)
            .all(|c| *c == Call::PollDiscovery),
        "only discovery polls may precede analysis submission: {calls:?}"
    );
    assert!(
        calls[submit_analysis..]
            .iter()
            .all(|c| *c != Call::PollDiscovery),
        "discovery must not be polled after analysis starts: {calls:?}"
    );

    let fetch = calls
        .iter()
        .position(|c| *c == Call::FetchResults)
        .expect("results were fetched");
    assert!(fetch > submit_analysis);
    assert!(
        calls[submit_analysis + 1..fetch]
            .iter()
            .all(|c| *c == Call::PollAnalysis),
        "only analysis polls may sit between analysis submission and results: {calls:?}"
    );
    assert_eq!(calls.last(), Some(&Call::FetchResults));
}

#[tokio::test]
async fn full_lifecycle_completes_and_persists_valid_findings() {
    // Poll sequences [30, 70, 100] and [50, 100]; three findings, one
    // missing its rule name.
    let store = Arc::new(MemoryStore::new());
    let adapter = Arc::new(MockAdapter::percents(&[30, 70, 100], &[50, 100]).with_results(vec![
        raw_finding("https://example.test/a", Some("XSS"), "High"),
        raw_finding("https://example.test/b", None, "Low"),
        raw_finding("https://example.test/c", Some("SQL Injection"), "Critical"),
    ]));
    let scan = new_scan(&store).await;

    let finished = runner(&store, &adapter)
        .run(scan.id, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(finished.status, ScanStatus::Completed);
    assert_eq!(finished.finding_count, 2);

    let stored = store.get(scan.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ScanStatus::Completed);
    assert_eq!(stored.finding_count, 2);
    assert_eq!(stored.phase1_external_id.as_deref(), Some(DISCOVERY_ID));
    assert_eq!(stored.phase2_external_id.as_deref(), Some(ANALYSIS_ID));

    use scanforge::store::FindingStore;
    assert_eq!(store.count_for_scan(scan.id).await.unwrap(), 2);

    // [30, 70, 100] is three discovery polls, [50, 100] two analysis polls.
    let calls = adapter.calls();
    assert_eq!(
        calls.iter().filter(|c| **c == Call::PollDiscovery).count(),
        3
    );
    assert_eq!(calls.iter().filter(|c| **c == Call::PollAnalysis).count(), 2);
    assert_phase_ordering(&calls);
}

#[tokio::test]
async fn analysis_never_submitted_before_discovery_completes() {
    // Randomized progress sequences from a deterministic generator.
    let mut state: u64 = 0x5eed;
    let mut next = move |bound: u64| {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (state >> 33) % bound
    };

    for _ in 0..16 {
        let discovery: Vec<u8> = (0..next(6)).map(|_| next(100) as u8).collect();
        let analysis: Vec<u8> = (0..next(6)).map(|_| next(100) as u8).collect();

        let store = Arc::new(MemoryStore::new());
        let adapter = Arc::new(MockAdapter::percents(
            &[discovery, vec![100]].concat(),
            &[analysis, vec![100]].concat(),
        ));
        let scan = new_scan(&store).await;

        let finished = runner(&store, &adapter)
            .run(scan.id, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(finished.status, ScanStatus::Completed);
        assert_phase_ordering(&adapter.calls());
    }
}

#[tokio::test]
async fn terminal_scan_makes_zero_external_calls() {
    let store = Arc::new(MemoryStore::new());
    let adapter = Arc::new(MockAdapter::percents(&[100], &[100]));
    let scan = new_scan(&store).await;

    let lifecycle = runner(&store, &adapter);
    let finished = lifecycle
        .run(scan.id, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(finished.status, ScanStatus::Completed);
    let calls_after_first_run = adapter.call_count();

    // Re-running and re-checking a terminal scan touches nothing external.
    let rerun = lifecycle
        .run(scan.id, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(rerun.status, ScanStatus::Completed);
    let progress = lifecycle.check(scan.id).await.unwrap();
    assert_eq!(progress.scan.status, ScanStatus::Completed);
    assert!(progress.live_progress.is_none());

    assert_eq!(adapter.call_count(), calls_after_first_run);
}

#[tokio::test]
async fn discovery_submit_failure_fails_scan_without_polling() {
    let store = Arc::new(MemoryStore::new());
    let adapter = Arc::new(MockAdapter {
        fail_discovery_submit: true,
        ..MockAdapter::default()
    });
    let scan = new_scan(&store).await;

    let finished = runner(&store, &adapter)
        .run(scan.id, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(finished.status, ScanStatus::Failed);
    let stored = store.get(scan.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ScanStatus::Failed);
    assert!(stored
        .failure_reason
        .unwrap()
        .contains("discovery submission failed"));
    assert_eq!(adapter.calls(), vec![Call::SubmitDiscovery]);
}

#[tokio::test]
async fn vendor_reported_phase_failure_fails_scan() {
    let store = Arc::new(MemoryStore::new());
    let adapter = Arc::new(MockAdapter::new(
        vec![
            PhaseProgress::Running(40),
            PhaseProgress::Failed("crawler crashed".to_string()),
        ],
        vec![],
    ));
    let scan = new_scan(&store).await;

    let finished = runner(&store, &adapter)
        .run(scan.id, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(finished.status, ScanStatus::Failed);
    assert!(finished.failure_reason.unwrap().contains("crawler crashed"));
    // Analysis was never started.
    assert!(adapter.calls().iter().all(|c| *c != Call::SubmitAnalysis));
}

#[tokio::test]
async fn result_fetch_failure_fails_scan_and_zeroes_count() {
    let store = Arc::new(MemoryStore::new());
    let adapter = Arc::new(MockAdapter {
        fail_results: true,
        ..MockAdapter::percents(&[100], &[100])
    });
    let scan = new_scan(&store).await;

    let finished = runner(&store, &adapter)
        .run(scan.id, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(finished.status, ScanStatus::Failed);
    assert_eq!(finished.finding_count, 0);
    let stored = store.get(scan.id).await.unwrap().unwrap();
    assert_eq!(stored.finding_count, 0);
    assert!(stored.failure_reason.unwrap().contains("result fetch failed"));
}

#[tokio::test]
async fn missing_phase_id_is_a_data_integrity_failure() {
    let store = Arc::new(MemoryStore::new());
    let adapter = Arc::new(MockAdapter::percents(&[100], &[100]));
    let scan = new_scan(&store).await;

    // Force a non-pending state without an external id.
    store
        .set_status(scan.id, ScanStatus::Phase1Running)
        .await
        .unwrap();

    let finished = runner(&store, &adapter)
        .run(scan.id, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(finished.status, ScanStatus::Failed);
    assert!(finished
        .failure_reason
        .unwrap()
        .contains("missing discovery phase id"));
    // The empty identifier was never polled.
    assert_eq!(adapter.call_count(), 0);
}

#[tokio::test]
async fn cancellation_aborts_a_stuck_poll_loop() {
    let store = Arc::new(MemoryStore::new());
    // Discovery progress never leaves 10 percent.
    let adapter = Arc::new(MockAdapter::percents(&[10], &[100]));
    let scan = new_scan(&store).await;

    let lifecycle = LifecycleRunner::new(
        store.clone(),
        store.clone(),
        adapter.clone(),
        Duration::from_millis(20),
        Duration::from_secs(60),
    );

    let running = RunningScans::new();
    let token = running.register(scan.id);
    let handle = tokio::spawn(async move { lifecycle.run(scan.id, token).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(running.cancel(scan.id));

    let finished = handle.await.unwrap().unwrap();
    assert_eq!(finished.status, ScanStatus::Failed);
    assert_eq!(
        finished.failure_reason.as_deref(),
        Some("aborted by operator")
    );
}

#[tokio::test]
async fn lifecycle_timeout_forces_failed() {
    let store = Arc::new(MemoryStore::new());
    let adapter = Arc::new(MockAdapter::percents(&[10], &[100]));
    let scan = new_scan(&store).await;

    let lifecycle = LifecycleRunner::new(
        store.clone(),
        store.clone(),
        adapter.clone(),
        Duration::from_millis(10),
        Duration::from_millis(40),
    );

    let finished = lifecycle
        .run(scan.id, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(finished.status, ScanStatus::Failed);
    assert_eq!(
        finished.failure_reason.as_deref(),
        Some("lifecycle timed out")
    );
}

#[tokio::test]
async fn check_reports_live_progress_without_persisting_it() {
    let store = Arc::new(MemoryStore::new());
    let adapter = Arc::new(MockAdapter::percents(&[100], &[40, 100]));
    let scan = new_scan(&store).await;

    store.set_phase1_started(scan.id, DISCOVERY_ID).await.unwrap();
    store.set_phase2_started(scan.id, ANALYSIS_ID).await.unwrap();

    let lifecycle = runner(&store, &adapter);
    let progress = lifecycle.check(scan.id).await.unwrap();
    assert_eq!(progress.live_progress, Some(40));

    // The stored record was not advanced by the read.
    let stored = store.get(scan.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ScanStatus::Phase2Running);
}

#[tokio::test]
async fn abort_of_unknown_scan_reports_not_running() {
    let running = RunningScans::new();
    assert!(!running.cancel(Uuid::new_v4()));

    let scan_id = Uuid::new_v4();
    let token = running.register(scan_id);
    assert!(running.cancel(scan_id));
    assert!(token.is_cancelled());

    running.remove(scan_id);
    assert!(!running.cancel(scan_id));
}

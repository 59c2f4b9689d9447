// End-to-end behaviour of detectors driven through the dispatcher.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use charsense::{
    DetectError, Detection, DetectionOutcome, Detector, Dispatched, Dispatcher, ErrorKind, Match,
    Mode, Oracle, OracleConfig, OracleError, OracleInitError, PoolConfig, ResultShape,
    SignatureOracle, Task, TaskId, WorkerPool,
};

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Default oracle plus counters: how often it was fed and how many feeds
/// overlapped at peak.
struct Instrumented {
    inner:  SignatureOracle,
    calls:  Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
    peak:   Arc<AtomicUsize>,
}

impl Oracle for Instrumented {
    fn set_analysis_target(&mut self, bytes: &[u8]) -> Result<(), OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(2));
        let result = self.inner.set_analysis_target(bytes);
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn best_match(&self) -> Option<Match> {
        self.inner.best_match()
    }

    fn all_matches(&self) -> Vec<Match> {
        self.inner.all_matches()
    }
}

#[derive(Default, Clone)]
struct Probe {
    calls: Arc<AtomicUsize>,
    peak:  Arc<AtomicUsize>,
}

fn instrumented() -> (Detector, Probe) {
    let probe  = Probe::default();
    let calls  = Arc::clone(&probe.calls);
    let peak   = Arc::clone(&probe.peak);
    let detector = Detector::with_oracle(move || {
        Ok(Instrumented {
            inner:  SignatureOracle::new(&OracleConfig::default())?,
            calls,
            active: Arc::new(AtomicUsize::new(0)),
            peak,
        })
    })
    .unwrap();
    (detector, probe)
}

fn dispatcher(workers: usize) -> Dispatcher {
    Dispatcher::new(WorkerPool::new(&PoolConfig { workers, max_queued: 1024 }).unwrap())
}

type Outcomes = Rc<RefCell<HashMap<TaskId, DetectionOutcome>>>;

fn collect_into(outcomes: &Outcomes) -> impl FnOnce(TaskId, DetectionOutcome) + 'static {
    let outcomes = Rc::clone(outcomes);
    move |id, outcome| {
        let previous = outcomes.borrow_mut().insert(id, outcome);
        assert!(previous.is_none(), "task {id} completed twice");
    }
}

fn samples() -> Vec<Vec<u8>> {
    vec![
        b"Plain ASCII letters only".to_vec(),
        "Grüße aus Köln, naïve café".as_bytes().to_vec(),
        "日本語のテキストです。".as_bytes().to_vec(),
        [0xFF, 0xFE].into_iter().chain("hello".encode_utf16().flat_map(u16::to_le_bytes)).collect(),
        encoding_rs::WINDOWS_1251.encode("Съешь же ещё этих мягких французских булок, да выпей чаю.").0.into_owned(),
        vec![0, 0, 0, 0, 0x81, 0x81, 0, 0],
    ]
}

// ── Empty input ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn empty_input_is_empty_in_every_mode_and_shape() {
    let (detector, probe) = instrumented();
    let mut d = dispatcher(2);
    let outcomes: Outcomes = Rc::default();

    for shape in [ResultShape::NameOnly, ResultShape::RankedCandidates] {
        assert_eq!(d.detect_sync(&detector, b"", shape), DetectionOutcome::Empty);
        d.detect_async(&detector, b"", shape, collect_into(&outcomes));
    }
    assert_eq!(d.drain().await, 2);

    assert!(outcomes.borrow().values().all(DetectionOutcome::is_empty));
    assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
}

// ── Sync / async agreement ────────────────────────────────────────────────────

#[tokio::test]
async fn sync_and_async_agree() {
    let mut d = dispatcher(4);
    for shape in [ResultShape::NameOnly, ResultShape::RankedCandidates] {
        for input in samples() {
            let sync_outcome = d.detect_sync(&Detector::new().unwrap(), &input, shape);

            let outcomes: Outcomes = Rc::default();
            let id = d.detect_async(&Detector::new().unwrap(), &input, shape, collect_into(&outcomes));
            assert_eq!(d.next_completion().await, Some(id));

            assert_eq!(outcomes.borrow()[&id], sync_outcome, "input {input:?}");
        }
    }
}

// ── Serialization ─────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn many_async_tasks_complete_once_and_never_overlap() {
    const N: usize = 24;
    let (detector, probe) = instrumented();
    let reference = Detector::new().unwrap();
    let mut d = dispatcher(4);
    let outcomes: Outcomes = Rc::default();

    let inputs = samples();
    let mut expected = HashMap::new();
    for i in 0..N {
        let mut input = inputs[i % inputs.len()].clone();
        // the caller's buffer can change right after submission
        let id = d.detect_async(&detector, &input, ResultShape::RankedCandidates, collect_into(&outcomes));
        expected.insert(id, reference.detect(&input, ResultShape::RankedCandidates));
        input.clear();
    }

    assert_eq!(d.drain().await, N);
    assert_eq!(d.pending(), 0);

    let outcomes = outcomes.borrow();
    assert_eq!(outcomes.len(), N);
    for (id, outcome) in outcomes.iter() {
        assert_eq!(outcome, &expected[id]);
    }
    assert_eq!(probe.calls.load(Ordering::SeqCst), N);
    assert_eq!(probe.peak.load(Ordering::SeqCst), 1);

    let stats = d.pool().stats();
    assert_eq!(stats.completed, N as u64);
    assert_eq!(stats.queued, 0);
}

// ── Ranked output ─────────────────────────────────────────────────────────────

#[test]
fn ranked_candidates_never_increase() {
    let detector = Detector::new().unwrap();
    for input in samples() {
        if let DetectionOutcome::Success(Detection::Ranked(list)) =
            detector.detect(&input, ResultShape::RankedCandidates)
        {
            assert!(!list.is_empty());
            assert!(list.windows(2).all(|w| w[0].confidence >= w[1].confidence), "{list:?}");
        }
    }
}

#[test]
fn name_only_reports_the_head_of_the_ranking() {
    let detector = Detector::new().unwrap();
    for input in samples() {
        let best   = detector.detect(&input, ResultShape::NameOnly);
        let ranked = detector.detect(&input, ResultShape::RankedCandidates);
        assert_eq!(
            best.detection().and_then(Detection::best),
            ranked.detection().and_then(Detection::best)
        );
    }
}

// ── Task validation ───────────────────────────────────────────────────────────

#[tokio::test]
async fn async_task_without_handler_is_rejected_up_front() {
    let err = Task::builder(b"abc").mode(Mode::Async).build().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidTask);

    // the pool never saw it
    let d = dispatcher(1);
    assert_eq!(d.pool().stats().submitted, 0);
}

#[tokio::test]
async fn dispatch_honours_the_built_mode() {
    let detector = Detector::new().unwrap();
    let mut d = dispatcher(1);
    let outcomes: Outcomes = Rc::default();

    let sync_task = Task::builder(b"abc").shape(ResultShape::RankedCandidates).build().unwrap();
    assert!(matches!(d.dispatch(&detector, sync_task), Dispatched::Completed(o) if o.is_success()));

    let async_task = Task::builder(b"abc").mode(Mode::Async).on_complete(collect_into(&outcomes)).build().unwrap();
    let task_id = async_task.id();
    assert!(matches!(d.dispatch(&detector, async_task), Dispatched::Queued(id) if id == task_id));
    assert_eq!(d.drain().await, 1);
    assert!(outcomes.borrow()[&task_id].is_success());
}

// ── Scenarios ─────────────────────────────────────────────────────────────────

#[test]
fn ascii_letters_detect_as_ascii_compatible() {
    let detector = Detector::new().unwrap();
    let outcome = detector.detect(b"OnlyAsciiLettersHere", ResultShape::NameOnly);
    let DetectionOutcome::Success(Detection::Best(m)) = outcome else { panic!("{outcome:?}") };
    assert!(m.is_ascii_compatible(), "{m}");
    assert!(m.confidence > 0);
}

#[test]
fn utf16le_bom_detects_as_utf16le() {
    let detector = Detector::new().unwrap();
    let mut input = vec![0xFF, 0xFE];
    input.extend("Grüße".encode_utf16().flat_map(u16::to_le_bytes));
    let outcome = detector.detect(&input, ResultShape::NameOnly);
    assert_eq!(outcome, DetectionOutcome::Success(Detection::Best(Match::new("UTF-16LE", 100))));
}

#[test]
fn textless_input_is_empty_not_failure() {
    let detector = Detector::new().unwrap();
    let outcome = detector.detect(&[0, 0, 0, 0, 0x81, 0x81, 0, 0], ResultShape::RankedCandidates);
    assert!(outcome.is_empty());
    assert_eq!(outcome.into_result(), Ok(None));
}

// ── Closed detectors ──────────────────────────────────────────────────────────

#[tokio::test]
async fn closed_detector_fails_fast_on_both_paths() {
    let (detector, probe) = instrumented();
    detector.close();
    let mut d = dispatcher(1);
    let outcomes: Outcomes = Rc::default();

    let outcome = d.detect_sync(&detector, b"abc", ResultShape::NameOnly);
    assert_eq!(outcome, DetectionOutcome::Failure(DetectError::DetectorClosed));

    let id = d.detect_async(&detector, b"abc", ResultShape::NameOnly, collect_into(&outcomes));
    d.drain().await;
    assert_eq!(outcomes.borrow()[&id], DetectionOutcome::Failure(DetectError::DetectorClosed));
    assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
}

// ── Failures ──────────────────────────────────────────────────────────────────

#[test]
fn oracle_init_failure_prevents_construction() {
    let config = OracleConfig { declared_encoding: Some("not-a-charset".into()), ..Default::default() };
    let err = Detector::with_config(&config).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OracleInit);

    let err = Detector::with_oracle(|| Err::<SignatureOracle, _>(OracleInitError::new(99, "tables missing"))).unwrap_err();
    assert_eq!(err, DetectError::OracleInit { code: 99 });
}

#[tokio::test]
async fn oracle_errors_arrive_through_the_completion_channel() {
    let config = OracleConfig { max_input_len: 8, ..Default::default() };
    let detector = Detector::with_config(&config).unwrap();
    let mut d = dispatcher(2);
    let outcomes: Outcomes = Rc::default();

    let too_big = d.detect_async(&detector, b"0123456789", ResultShape::NameOnly, collect_into(&outcomes));
    let fine    = d.detect_async(&detector, b"short", ResultShape::NameOnly, collect_into(&outcomes));
    assert_eq!(d.drain().await, 2);

    let outcomes = outcomes.borrow();
    assert_eq!(outcomes[&too_big].error_kind(), Some(ErrorKind::Oracle));
    assert!(outcomes[&fine].is_success());
}

#[tokio::test]
async fn queue_overflow_is_a_resource_failure() {
    let pool = WorkerPool::new(&PoolConfig { workers: 1, max_queued: 1 }).unwrap();
    let mut d = Dispatcher::new(pool);
    let (detector, _) = instrumented();
    let outcomes: Outcomes = Rc::default();

    let first  = d.detect_async(&detector, b"first", ResultShape::NameOnly, collect_into(&outcomes));
    let second = d.detect_async(&detector, b"second", ResultShape::NameOnly, collect_into(&outcomes));
    assert_eq!(d.drain().await, 2);

    let outcomes = outcomes.borrow();
    assert!(outcomes[&first].is_success());
    assert_eq!(outcomes[&second].error_kind(), Some(ErrorKind::Resource));
}

// ── Shared pool ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn one_pool_serves_several_dispatchers() {
    let pool = WorkerPool::new(&PoolConfig { workers: 2, max_queued: 64 }).unwrap();
    let mut a = Dispatcher::new(pool.clone());
    let mut b = Dispatcher::new(pool.clone());
    let outcomes: Outcomes = Rc::default();

    let da = Detector::new().unwrap();
    let db = Detector::new().unwrap();
    assert_ne!(da.id(), db.id());

    a.detect_async(&da, b"from a", ResultShape::NameOnly, collect_into(&outcomes));
    b.detect_async(&db, b"from b", ResultShape::NameOnly, collect_into(&outcomes));
    assert_eq!(a.drain().await + b.drain().await, 2);

    assert_eq!(pool.stats().completed, 2);
    assert!(outcomes.borrow().values().all(DetectionOutcome::is_success));
}

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use gitrunner::core::{
    decode, Config, CsvQueue, Invocation, JobExecutor, JobRecord, JobStatus, LoopOutcome,
    ProcessExecutor, PublishOutcome, QueueStore, RunnerError, SyncGateway, Worker, WorkerState,
};
use tempfile::TempDir;

/// Records every pull and publish; rejects publishes whose message starts
/// with `reject_prefix`, at most `reject_limit` times when set.
#[derive(Default)]
struct FakeGateway {
    reject_prefix: Option<&'static str>,
    reject_limit: Option<usize>,
    rejections: Cell<usize>,
    pulls: Cell<usize>,
    discarded: RefCell<Vec<PathBuf>>,
    published: RefCell<Vec<(Vec<PathBuf>, String)>>,
}

impl FakeGateway {
    fn rejecting(prefix: &'static str) -> Self {
        Self {
            reject_prefix: Some(prefix),
            ..Self::default()
        }
    }

    fn rejecting_once(prefix: &'static str) -> Self {
        Self {
            reject_prefix: Some(prefix),
            reject_limit: Some(1),
            ..Self::default()
        }
    }

    fn rejects(&self, message: &str) -> bool {
        let matches = self.reject_prefix.is_some_and(|prefix| message.starts_with(prefix));
        let within_limit = self
            .reject_limit
            .map_or(true, |limit| self.rejections.get() < limit);
        matches && within_limit
    }

    fn messages(&self) -> Vec<String> {
        self.published.borrow().iter().map(|(_, m)| m.clone()).collect()
    }

    fn published_paths(&self) -> Vec<PathBuf> {
        self.published
            .borrow()
            .iter()
            .flat_map(|(paths, _)| paths.clone())
            .collect()
    }
}

impl SyncGateway for FakeGateway {
    fn sync_identity(&self, _name: Option<&str>, _email: Option<&str>) -> Result<(), RunnerError> {
        Ok(())
    }

    fn pull(&self) -> Result<(), RunnerError> {
        self.pulls.set(self.pulls.get() + 1);
        Ok(())
    }

    fn publish(&self, paths: &[&Path], message: &str) -> Result<PublishOutcome, RunnerError> {
        if self.rejects(message) {
            self.rejections.set(self.rejections.get() + 1);
            return Err(RunnerError::PushRejected {
                message: "! [rejected] main -> main (fetch first)".to_string(),
            });
        }
        self.published.borrow_mut().push((
            paths.iter().map(|p| p.to_path_buf()).collect(),
            message.to_string(),
        ));
        Ok(PublishOutcome::Committed)
    }

    fn discard(&self, paths: &[&Path]) -> Result<(), RunnerError> {
        self.discarded
            .borrow_mut()
            .extend(paths.iter().map(|p| p.to_path_buf()));
        Ok(())
    }
}

/// Returns queued exit codes (0 once exhausted); `None` simulates a program
/// that cannot be launched.
#[derive(Default)]
struct FakeExecutor {
    codes: RefCell<VecDeque<Option<i32>>>,
    runs: RefCell<Vec<Invocation>>,
}

impl FakeExecutor {
    fn with_codes(codes: &[Option<i32>]) -> Self {
        Self {
            codes: RefCell::new(codes.iter().copied().collect()),
            runs: RefCell::default(),
        }
    }

    fn run_count(&self) -> usize {
        self.runs.borrow().len()
    }
}

impl JobExecutor for FakeExecutor {
    fn run(&self, invocation: &Invocation) -> Result<i32, RunnerError> {
        self.runs.borrow_mut().push(invocation.clone());
        match self.codes.borrow_mut().pop_front() {
            Some(Some(code)) => Ok(code),
            None => Ok(0),
            Some(None) => Err(RunnerError::Execution {
                program: invocation.program.clone(),
                message: "binary not found in PATH".to_string(),
            }),
        }
    }
}

struct Fixture {
    _dir: TempDir,
    config: Config,
    store: CsvQueue,
}

impl Fixture {
    fn new(commands: &[&str]) -> Self {
        let dir = TempDir::new().unwrap();
        let config = Config {
            queue_file: dir.path().join("queue.csv"),
            results_dir: dir.path().join("results"),
            sleep_time: Duration::ZERO,
            max_attempts: 1,
            ..Config::default()
        };
        fs::create_dir_all(&config.results_dir).unwrap();

        let store = CsvQueue::new(config.queue_file.clone());
        store.ensure_exists().unwrap();
        for command in commands {
            store.append(&decode(command).unwrap()).unwrap();
        }

        Self {
            _dir: dir,
            config,
            store,
        }
    }

    fn statuses(&self) -> Vec<JobStatus> {
        self.store
            .read_all()
            .unwrap()
            .into_iter()
            .map(|job| job.status)
            .collect()
    }
}

fn dummy_job() -> JobRecord {
    decode("python dummy_1.py 5 --cheese=pizza").unwrap()
}

#[test]
fn empty_queue_drains_after_attempt_ceiling() {
    let mut fixture = Fixture::new(&[]);
    fixture.config.max_attempts = 3;
    let gateway = FakeGateway::default();
    let executor = FakeExecutor::default();

    let mut worker = Worker::new(&fixture.config, &fixture.store, &gateway, &executor);
    assert_eq!(worker.step(WorkerState::Scanning), WorkerState::Scanning);
    assert_eq!(worker.step(WorkerState::Scanning), WorkerState::Scanning);
    assert_eq!(worker.step(WorkerState::Scanning), WorkerState::Drained);

    assert_eq!(gateway.pulls.get(), 3);
    assert!(gateway.messages().is_empty());
    assert_eq!(executor.run_count(), 0);
}

#[test]
fn drained_loop_exits_zero() {
    let fixture = Fixture::new(&[]);
    let gateway = FakeGateway::default();
    let executor = FakeExecutor::default();

    let outcome = Worker::new(&fixture.config, &fixture.store, &gateway, &executor).run();
    assert_eq!(outcome, LoopOutcome::Drained);
    assert_eq!(outcome.exit_code(), 0);
}

#[test]
fn dry_run_job_walks_every_state_to_done() {
    let fixture = Fixture::new(&["python dummy_1.py 5 --cheese=pizza"]);
    let gateway = FakeGateway::default();
    let executor = ProcessExecutor::new(true);
    let mut worker = Worker::new(&fixture.config, &fixture.store, &gateway, &executor);

    let state = worker.step(WorkerState::Scanning);
    assert_eq!(state, WorkerState::Claiming(dummy_job()));

    let state = worker.step(state);
    assert_eq!(
        state,
        WorkerState::Executing(dummy_job().with_status(JobStatus::Running))
    );
    assert_eq!(fixture.statuses(), vec![JobStatus::Running]);

    let state = worker.step(state);
    assert!(matches!(
        state,
        WorkerState::Finalizing {
            exit_code: Some(0),
            ..
        }
    ));

    let state = worker.step(state);
    assert_eq!(state, WorkerState::Scanning);
    assert_eq!(fixture.statuses(), vec![JobStatus::Done]);

    assert_eq!(
        gateway.messages(),
        vec![
            "Started dummy_1.py 5 --cheese=pizza".to_string(),
            "Finished dummy_1.py 5 --cheese=pizza".to_string(),
            "Add results for dummy_1_5".to_string(),
        ]
    );
    assert_eq!(
        gateway.published_paths(),
        vec![
            fixture.config.queue_file.clone(),
            fixture.config.queue_file.clone(),
            fixture.config.results_dir.clone(),
        ]
    );

    assert_eq!(worker.step(state), WorkerState::Drained);
}

#[test]
fn failing_job_is_recorded_without_publishing_results() {
    let fixture = Fixture::new(&["python dummy_1.py 5 --cheese=pizza"]);
    let gateway = FakeGateway::default();
    let executor = FakeExecutor::with_codes(&[Some(1)]);

    let outcome = Worker::new(&fixture.config, &fixture.store, &gateway, &executor).run();

    assert_eq!(outcome, LoopOutcome::Drained);
    assert_eq!(fixture.statuses(), vec![JobStatus::Failed]);
    assert_eq!(executor.run_count(), 1);
    assert_eq!(
        gateway.messages(),
        vec![
            "Started dummy_1.py 5 --cheese=pizza".to_string(),
            "Failed dummy_1.py 5 --cheese=pizza".to_string(),
        ]
    );
    assert!(!gateway.published_paths().contains(&fixture.config.results_dir));
}

#[test]
fn rejected_claim_resets_job_to_ready() {
    let mut fixture = Fixture::new(&["python dummy_1.py 5 --cheese=pizza"]);
    fixture.config.max_attempts = 3;
    let gateway = FakeGateway::rejecting("Started");
    let executor = FakeExecutor::default();
    let mut worker = Worker::new(&fixture.config, &fixture.store, &gateway, &executor);

    let state = worker.step(WorkerState::Scanning);
    let state = worker.step(state);

    assert_eq!(state, WorkerState::Scanning);
    assert_eq!(fixture.statuses(), vec![JobStatus::Ready]);
    assert_eq!(executor.run_count(), 0);
}

#[test]
fn repeated_claim_rejections_abort() {
    let mut fixture = Fixture::new(&["python dummy_1.py 5 --cheese=pizza"]);
    fixture.config.max_attempts = 2;
    let gateway = FakeGateway::rejecting("Started");
    let executor = FakeExecutor::default();

    let outcome = Worker::new(&fixture.config, &fixture.store, &gateway, &executor).run();

    assert_eq!(outcome, LoopOutcome::Aborted);
    assert_eq!(outcome.exit_code(), 1);
    assert_eq!(fixture.statuses(), vec![JobStatus::Ready]);
    assert_eq!(executor.run_count(), 0);
}

#[test]
fn unreadable_queue_aborts() {
    let mut fixture = Fixture::new(&[]);
    fixture.config.max_attempts = 2;
    fs::remove_file(&fixture.config.queue_file).unwrap();
    let gateway = FakeGateway::default();
    let executor = FakeExecutor::default();

    let outcome = Worker::new(&fixture.config, &fixture.store, &gateway, &executor).run();
    assert_eq!(outcome, LoopOutcome::Aborted);
    assert_eq!(gateway.pulls.get(), 2);
}

#[test]
fn failed_status_publish_does_not_stop_the_loop() {
    let fixture = Fixture::new(&["a.py 1", "b.py 2"]);
    let gateway = FakeGateway::rejecting("Finished");
    let executor = FakeExecutor::default();

    let outcome = Worker::new(&fixture.config, &fixture.store, &gateway, &executor).run();

    assert_eq!(outcome, LoopOutcome::Drained);
    assert_eq!(fixture.statuses(), vec![JobStatus::Done, JobStatus::Done]);
    assert_eq!(executor.run_count(), 2);
    assert_eq!(
        *gateway.discarded.borrow(),
        vec![fixture.config.queue_file.clone(), fixture.config.queue_file.clone()]
    );
}

#[test]
fn rejected_status_publish_is_reapplied_after_pull() {
    let mut fixture = Fixture::new(&["python dummy_1.py 5 --cheese=pizza"]);
    fixture.config.max_attempts = 3;
    let gateway = FakeGateway::rejecting_once("Finished");
    let executor = FakeExecutor::default();
    let mut worker = Worker::new(&fixture.config, &fixture.store, &gateway, &executor);

    let state = worker.step(WorkerState::Scanning);
    let state = worker.step(state);
    let state = worker.step(state);
    let pulls_before = gateway.pulls.get();

    assert_eq!(worker.step(state), WorkerState::Scanning);
    assert_eq!(gateway.pulls.get(), pulls_before + 1);
    assert_eq!(*gateway.discarded.borrow(), vec![fixture.config.queue_file.clone()]);
    assert_eq!(fixture.statuses(), vec![JobStatus::Done]);
    assert_eq!(
        gateway.messages(),
        vec![
            "Started dummy_1.py 5 --cheese=pizza".to_string(),
            "Finished dummy_1.py 5 --cheese=pizza".to_string(),
            "Add results for dummy_1_5".to_string(),
        ]
    );
}

#[test]
fn rejected_results_publish_is_retried() {
    let mut fixture = Fixture::new(&["python dummy_1.py 5 --cheese=pizza"]);
    fixture.config.max_attempts = 2;
    let gateway = FakeGateway::rejecting_once("Add results");
    let executor = FakeExecutor::default();

    let outcome = Worker::new(&fixture.config, &fixture.store, &gateway, &executor).run();

    assert_eq!(outcome, LoopOutcome::Drained);
    assert!(gateway.discarded.borrow().is_empty());
    assert!(gateway
        .messages()
        .contains(&"Add results for dummy_1_5".to_string()));
}

#[test]
fn jobs_run_in_file_order_skipping_claimed_ones() {
    let fixture = Fixture::new(&["first.py", "second.py", "third.py"]);
    let first = decode("first.py").unwrap();
    fixture
        .store
        .update_status(&first.identity(), JobStatus::Running)
        .unwrap();
    let gateway = FakeGateway::default();
    let executor = FakeExecutor::default();

    Worker::new(&fixture.config, &fixture.store, &gateway, &executor).run();

    let scripts: Vec<_> = executor
        .runs
        .borrow()
        .iter()
        .map(|invocation| invocation.args[0].clone())
        .collect();
    assert_eq!(scripts, vec!["second.py", "third.py"]);
    assert_eq!(
        fixture.statuses(),
        vec![JobStatus::Running, JobStatus::Done, JobStatus::Done]
    );
}

#[test]
fn failing_job_is_retried_up_to_job_attempts() {
    let mut fixture = Fixture::new(&["flaky.py"]);
    fixture.config.max_job_attempts = 3;
    let gateway = FakeGateway::default();
    let executor = FakeExecutor::with_codes(&[Some(2), Some(0)]);

    Worker::new(&fixture.config, &fixture.store, &gateway, &executor).run();

    assert_eq!(executor.run_count(), 2);
    assert_eq!(fixture.statuses(), vec![JobStatus::Done]);
}

#[test]
fn unlaunchable_job_is_recorded_as_failed() {
    let mut fixture = Fixture::new(&["missing.py", "next.py"]);
    fixture.config.max_job_attempts = 3;
    let gateway = FakeGateway::default();
    let executor = FakeExecutor::with_codes(&[None]);

    let outcome = Worker::new(&fixture.config, &fixture.store, &gateway, &executor).run();

    assert_eq!(outcome, LoopOutcome::Drained);
    assert_eq!(executor.run_count(), 2);
    assert_eq!(fixture.statuses(), vec![JobStatus::Failed, JobStatus::Done]);
}

#[test]
fn identical_jobs_are_claimed_together() {
    let fixture = Fixture::new(&["dup.py 1", "dup.py 1"]);
    let gateway = FakeGateway::default();
    let executor = FakeExecutor::default();

    Worker::new(&fixture.config, &fixture.store, &gateway, &executor).run();

    // Both rows share one identity, so one claim covers both and the job
    // runs once.
    assert_eq!(executor.run_count(), 1);
    assert_eq!(fixture.statuses(), vec![JobStatus::Done, JobStatus::Done]);
}

//! Bounded-concurrency task scheduler.
//!
//! The scheduler owns every task (an arena indexed by [`TaskId`]) and every
//! running process (a `JoinSet`). A single loop admits ready tasks up to the
//! job limit, waits for the next completion and repeats, so no state is shared
//! with the process futures.
//!
//! A failed task halts admissions. Tasks that are already running are left to
//! finish; nothing new starts afterwards.

use super::launcher::{Invocation, Launcher};
use super::task::{Task, TaskId, TaskState};
use super::unit::UnitId;
use super::BuildError;
use indicatif::ProgressBar;
use std::collections::HashMap;
use std::io;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Started(TaskId),
    Finished { task: TaskId, ok: bool },
    UnitFinished(UnitId),
    Halted,
}

/// One entry of the run log.
#[derive(Debug, Clone)]
pub struct SchedulerEvent {
    pub seq: usize,
    pub at: Instant,
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    pub task: TaskId,
    pub program: String,
    pub args: Vec<String>,
    pub code: Option<i32>,
    /// Launch error or timeout, when the process never produced an exit code
    pub message: Option<String>,
}

impl TaskFailure {
    pub fn to_error(&self) -> BuildError {
        match &self.message {
            Some(message) => BuildError::Launch {
                program: self.program.clone(),
                message: message.clone(),
            },
            None => BuildError::Process {
                program: self.program.clone(),
                args: self.args.clone(),
                code: self.code,
            },
        }
    }
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub tasks_run: usize,
    pub failures: Vec<TaskFailure>,
    pub events: Vec<SchedulerEvent>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.failures.is_empty()
    }

    /// When `task` was started, if it was.
    pub fn started_at(&self, task: TaskId) -> Option<Instant> {
        self.events.iter().find_map(|e| match e.kind {
            EventKind::Started(id) if id == task => Some(e.at),
            _ => None,
        })
    }

    pub fn finished_at(&self, task: TaskId) -> Option<Instant> {
        self.events.iter().find_map(|e| match e.kind {
            EventKind::Finished { task: id, .. } if id == task => Some(e.at),
            _ => None,
        })
    }
}

#[derive(Debug)]
struct TaskSlot {
    task: Task,
    state: TaskState,
}

pub struct Scheduler {
    tasks: Vec<TaskSlot>,
    remaining: HashMap<UnitId, usize>,
    jobs: usize,
    progress: ProgressBar,
}

impl Scheduler {
    pub fn new(jobs: usize) -> Self {
        Self {
            tasks: Vec::new(),
            remaining: HashMap::new(),
            jobs: jobs.max(1),
            progress: ProgressBar::hidden(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub fn jobs(&self) -> usize {
        self.jobs
    }

    pub fn submit(&mut self, task: Task) -> TaskId {
        let id = TaskId(self.tasks.len());
        *self.remaining.entry(task.unit.clone()).or_default() += 1;
        self.tasks.push(TaskSlot {
            task,
            state: TaskState::Pending,
        });
        id
    }

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(id.0).map(|slot| &slot.task)
    }

    pub fn state(&self, id: TaskId) -> Option<TaskState> {
        self.tasks.get(id.0).map(|slot| slot.state)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn tasks(&self) -> impl Iterator<Item = (TaskId, &Task)> {
        self.tasks
            .iter()
            .enumerate()
            .map(|(index, slot)| (TaskId(index), &slot.task))
    }

    pub fn set_progress(&mut self, progress: ProgressBar) {
        self.progress = progress;
    }

    /// A unit is finished once none of its tasks is pending or running.
    /// Units without tasks count as finished.
    pub fn unit_finished(&self, unit: &UnitId) -> bool {
        self.remaining.get(unit).is_none_or(|n| *n == 0)
    }

    fn is_ready(&self, id: TaskId) -> bool {
        let slot = &self.tasks[id.0];
        slot.task.is_ready(
            slot.state,
            |dep| {
                self.tasks
                    .get(dep.0)
                    .is_some_and(|s| s.state.succeeded())
            },
            |unit| self.unit_finished(unit),
        )
    }

    /// Runs every submitted task to completion (or until the first failure).
    pub async fn run<L: Launcher>(&mut self, launcher: &L) -> Result<RunReport, BuildError> {
        let mut report = RunReport::default();
        let mut running: JoinSet<(TaskId, io::Result<Option<i32>>)> = JoinSet::new();
        let mut halted = false;

        self.progress.set_length(self.tasks.len() as u64);
        info!(tasks = self.tasks.len(), jobs = self.jobs, "starting build");

        loop {
            if !halted {
                self.admit(launcher, &mut running, &mut report);
            }

            let Some(joined) = running.join_next().await else {
                break;
            };
            let (id, result) = joined.map_err(|e| {
                BuildError::Io(io::Error::other(format!("process task failed: {}", e)))
            })?;

            if !self.complete(id, result, &mut report) && !halted {
                halted = true;
                push_event(&mut report, EventKind::Halted);
                error!("build halted, waiting for running tasks to finish");
            }
        }

        self.progress.finish_and_clear();

        let pending = self
            .tasks
            .iter()
            .filter(|slot| slot.state == TaskState::Pending)
            .count();
        if !halted && pending > 0 {
            return Err(BuildError::Stalled(pending));
        }

        Ok(report)
    }

    fn admit<L: Launcher>(
        &mut self,
        launcher: &L,
        running: &mut JoinSet<(TaskId, io::Result<Option<i32>>)>,
        report: &mut RunReport,
    ) {
        for index in 0..self.tasks.len() {
            if running.len() >= self.jobs {
                return;
            }
            let id = TaskId(index);
            if !self.is_ready(id) {
                continue;
            }

            let slot = &mut self.tasks[index];
            slot.state = TaskState::Running;
            let task = &slot.task;
            debug!(task = %id, command = %task.command_line(), "starting");
            self.progress.set_message(task.output.clone());

            let future = launcher.launch(Invocation {
                program: task.program.clone(),
                args: task.args.clone(),
                stdin: task.stdin.clone(),
            });
            running.spawn(async move { (id, future.await) });

            report.tasks_run += 1;
            push_event(report, EventKind::Started(id));
        }
    }

    /// Marks a task finished; returns whether it succeeded.
    fn complete(
        &mut self,
        id: TaskId,
        result: io::Result<Option<i32>>,
        report: &mut RunReport,
    ) -> bool {
        let slot = &mut self.tasks[id.0];
        let (ok, code, message) = match result {
            Ok(Some(0)) => (true, Some(0), None),
            Ok(code) => (false, code, None),
            Err(e) => (false, None, Some(e.to_string())),
        };
        slot.state = TaskState::Finished { ok };
        self.progress.inc(1);
        push_event(report, EventKind::Finished { task: id, ok });

        if !ok {
            let failure = TaskFailure {
                task: id,
                program: slot.task.program.clone(),
                args: slot.task.args.clone(),
                code,
                message,
            };
            error!("{}", failure.to_error());
            report.failures.push(failure);
        }

        let unit = slot.task.unit.clone();
        if let Some(remaining) = self.remaining.get_mut(&unit) {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                debug!(unit = %unit, "unit finished");
                push_event(report, EventKind::UnitFinished(unit));
            }
        }

        ok
    }
}

fn push_event(report: &mut RunReport, kind: EventKind) {
    let seq = report.events.len();
    report.events.push(SchedulerEvent {
        seq,
        at: Instant::now(),
        kind,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::future::Future;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Sleeps for the number of seconds given as the first argument.
    /// A program named `fail` exits with status 1.
    #[derive(Clone, Default)]
    struct FakeLauncher {
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl Launcher for FakeLauncher {
        fn launch(
            &self,
            invocation: Invocation,
        ) -> impl Future<Output = io::Result<Option<i32>>> + Send + 'static {
            let running = self.running.clone();
            let peak = self.peak.clone();
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);

                let secs: u64 = invocation
                    .args
                    .first()
                    .and_then(|a| a.parse().ok())
                    .unwrap_or(1);
                tokio::time::sleep(Duration::from_secs(secs)).await;

                running.fetch_sub(1, Ordering::SeqCst);
                if invocation.program == "fail" {
                    Ok(Some(1))
                } else {
                    Ok(Some(0))
                }
            }
        }
    }

    fn task(unit: &UnitId, output: &str, program: &str, secs: u64) -> Task {
        Task::new(unit, output, program).args([secs.to_string()])
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let unit = UnitId::from_name("app");
        let mut scheduler = Scheduler::new(2);
        for i in 0..6 {
            scheduler.submit(task(&unit, &format!("{}.o", i), "cc", 1));
        }

        let launcher = FakeLauncher::default();
        let report = scheduler.run(&launcher).await.unwrap();

        assert!(report.succeeded());
        assert_eq!(report.tasks_run, 6);
        assert_eq!(launcher.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prerequisites_finish_first() {
        let unit = UnitId::from_name("app");
        let mut scheduler = Scheduler::new(4);
        let a = scheduler.submit(task(&unit, "a.o", "cc", 2));
        let b = scheduler.submit(task(&unit, "b.o", "cc", 1));
        let link = scheduler.submit(task(&unit, "app", "ld", 1).after([a, b]));

        let report = scheduler.run(&FakeLauncher::default()).await.unwrap();
        let link_start = report.started_at(link).unwrap();
        assert!(link_start >= report.finished_at(a).unwrap());
        assert!(link_start >= report.finished_at(b).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_stops_new_admissions() {
        let unit = UnitId::from_name("app");
        let mut scheduler = Scheduler::new(2);
        let bad = scheduler.submit(task(&unit, "bad.o", "fail", 1));
        let slow = scheduler.submit(task(&unit, "slow.o", "cc", 3));
        let later = scheduler.submit(task(&unit, "later.o", "cc", 1));

        let report = scheduler.run(&FakeLauncher::default()).await.unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].task, bad);
        assert_eq!(report.failures[0].code, Some(1));
        // Running siblings settle, queued work never starts
        assert_eq!(scheduler.state(slow), Some(TaskState::Finished { ok: true }));
        assert_eq!(scheduler.state(later), Some(TaskState::Pending));

        let halted = report
            .events
            .iter()
            .find(|e| e.kind == EventKind::Halted)
            .unwrap()
            .seq;
        assert!(
            report
                .events
                .iter()
                .filter(|e| matches!(e.kind, EventKind::Started(_)))
                .all(|e| e.seq < halted)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_failures_are_all_recorded() {
        let unit = UnitId::from_name("app");
        let mut scheduler = Scheduler::new(2);
        scheduler.submit(task(&unit, "a.o", "fail", 1));
        scheduler.submit(task(&unit, "b.o", "fail", 1));

        let report = scheduler.run(&FakeLauncher::default()).await.unwrap();
        assert_eq!(report.failures.len(), 2);
        let halts = report
            .events
            .iter()
            .filter(|e| e.kind == EventKind::Halted)
            .count();
        assert_eq!(halts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_waits_for_subproject_unit() {
        let parent = UnitId::from_name("main.cpp");
        let child = UnitId::from_name("lib/lib.cpp");
        let mut scheduler = Scheduler::new(4);

        let own = scheduler.submit(task(&parent, "main.o", "cc", 1));
        scheduler.submit(task(&child, "lib.o", "cc", 5));
        let link = scheduler.submit(task(&parent, "app", "ld", 1).after([own]).after_units([&child]));

        let start = Instant::now();
        let report = scheduler.run(&FakeLauncher::default()).await.unwrap();

        assert!(report.finished_at(own).unwrap() - start <= Duration::from_secs(1));
        assert!(report.started_at(link).unwrap() - start >= Duration::from_secs(5));
        assert!(
            report
                .events
                .iter()
                .any(|e| e.kind == EventKind::UnitFinished(child.clone()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsatisfiable_prerequisite_stalls() {
        let unit = UnitId::from_name("app");
        let mut scheduler = Scheduler::new(1);
        scheduler.submit(task(&unit, "a.o", "cc", 1).after([TaskId(42)]));

        assert!(matches!(
            scheduler.run(&FakeLauncher::default()).await,
            Err(BuildError::Stalled(1))
        ));
    }

    #[tokio::test]
    async fn test_empty_run() {
        let mut scheduler = Scheduler::new(1);
        let report = scheduler.run(&FakeLauncher::default()).await.unwrap();
        assert_eq!(report.tasks_run, 0);
        assert!(scheduler.unit_finished(&UnitId::from_name("anything")));
    }

    fn random_dag() -> impl Strategy<Value = Vec<Vec<usize>>> {
        (1usize..12).prop_flat_map(|n| {
            (0..n)
                .map(|i| proptest::collection::vec(0..i.max(1), 0..=i.min(3)))
                .collect::<Vec<_>>()
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_start_order_is_topological(dag in random_dag(), jobs in 1usize..4) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .unwrap();

            let report = runtime.block_on(async {
                let unit = UnitId::from_name("app");
                let mut scheduler = Scheduler::new(jobs);
                for (i, deps) in dag.iter().enumerate() {
                    let deps: Vec<TaskId> = deps.iter().filter(|d| **d < i).map(|d| TaskId(*d)).collect();
                    scheduler.submit(task(&unit, &format!("{}.o", i), "cc", 1).after(deps));
                }
                scheduler.run(&FakeLauncher::default()).await.unwrap()
            });

            prop_assert_eq!(report.tasks_run, dag.len());
            for (i, deps) in dag.iter().enumerate() {
                let started = report.started_at(TaskId(i)).unwrap();
                for dep in deps.iter().filter(|d| **d < i) {
                    prop_assert!(report.finished_at(TaskId(*dep)).unwrap() <= started);
                }
            }
        }

        #[test]
        fn prop_no_start_after_halt(fail_at in 0usize..6, jobs in 1usize..3) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .unwrap();

            let report = runtime.block_on(async {
                let unit = UnitId::from_name("app");
                let mut scheduler = Scheduler::new(jobs);
                for i in 0..6 {
                    let program = if i == fail_at { "fail" } else { "cc" };
                    scheduler.submit(task(&unit, &format!("{}.o", i), program, (i % 3 + 1) as u64));
                }
                scheduler.run(&FakeLauncher::default()).await.unwrap()
            });

            let halt = report.events.iter().find(|e| e.kind == EventKind::Halted).map(|e| e.seq);
            prop_assert!(halt.is_some());
            if let Some(halt) = halt {
                prop_assert!(report
                    .events
                    .iter()
                    .filter(|e| matches!(e.kind, EventKind::Started(_)))
                    .all(|e| e.seq < halt));
            }
        }
    }
}

use super::unit::UnitId;
use std::fmt;

/// Index of a task in the scheduler arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub usize);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Finished { ok: bool },
}

impl TaskState {
    pub fn succeeded(&self) -> bool {
        matches!(self, TaskState::Finished { ok: true })
    }
}

/// One external process invocation producing `output`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub unit: UnitId,
    pub output: String,
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<Vec<u8>>,
    /// Tasks that must have finished successfully first
    pub prerequisites: Vec<TaskId>,
    /// Units that must be completely finished first
    pub unit_prerequisites: Vec<UnitId>,
}

impl Task {
    pub fn new(unit: &UnitId, output: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            unit: unit.clone(),
            output: output.into(),
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            prerequisites: Vec::new(),
            unit_prerequisites: Vec::new(),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn after(mut self, prerequisites: impl IntoIterator<Item = TaskId>) -> Self {
        for id in prerequisites {
            if !self.prerequisites.contains(&id) {
                self.prerequisites.push(id);
            }
        }
        self
    }

    pub fn after_units<'a>(mut self, units: impl IntoIterator<Item = &'a UnitId>) -> Self {
        for unit in units {
            if !self.unit_prerequisites.contains(unit) {
                self.unit_prerequisites.push(unit.clone());
            }
        }
        self
    }

    pub fn stdin(mut self, bytes: Option<Vec<u8>>) -> Self {
        self.stdin = bytes;
        self
    }

    /// A pending task whose prerequisite tasks all succeeded and whose
    /// prerequisite units are all finished.
    pub fn is_ready(
        &self,
        state: TaskState,
        task_succeeded: impl Fn(TaskId) -> bool,
        unit_finished: impl Fn(&UnitId) -> bool,
    ) -> bool {
        state == TaskState::Pending
            && self.prerequisites.iter().all(|id| task_succeeded(*id))
            && self.unit_prerequisites.iter().all(unit_finished)
    }

    /// `program arg arg ...`, for logs and reports.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

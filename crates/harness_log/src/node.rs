use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::buffer::{Priority, PriorityLineBuffer};
use crate::capture::LineTarget;
use crate::container::ContainerState;
use crate::error::LogError;
use crate::outcome::{Failure, Outcome};
use crate::registry::LoggerRegistry;
use crate::unit::{UnitHandle, UnitKind};

/// Logger flavour, derived from the kind of unit it records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Root,
    Suite,
    TestCase,
    Service,
    StartPhase,
    VerifyPhase,
    StopPhase,
    Task,
    Process,
}

impl NodeKind {
    /// `None` for units that never get a logger.
    pub fn for_unit(kind: UnitKind) -> Option<Self> {
        match kind {
            UnitKind::Structural => None,
            UnitKind::Suite => Some(NodeKind::Suite),
            UnitKind::TestCase => Some(NodeKind::TestCase),
            UnitKind::Service => Some(NodeKind::Service),
            UnitKind::StartPhase => Some(NodeKind::StartPhase),
            UnitKind::VerifyPhase => Some(NodeKind::VerifyPhase),
            UnitKind::StopPhase => Some(NodeKind::StopPhase),
            UnitKind::Task => Some(NodeKind::Task),
            UnitKind::Process { .. } => Some(NodeKind::Process),
        }
    }

    pub fn is_container(self) -> bool {
        !matches!(self, NodeKind::Task | NodeKind::Process)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::Root => "root",
            NodeKind::Suite => "suite",
            NodeKind::TestCase => "testcase",
            NodeKind::Service => "service",
            NodeKind::StartPhase => "start",
            NodeKind::VerifyPhase => "verify",
            NodeKind::StopPhase => "stop",
            NodeKind::Task => "task",
            NodeKind::Process => "process",
        }
    }
}

/// Units whose effect may outlive their own "finished" event.
pub(crate) fn outlives_unit(kind: UnitKind) -> bool {
    matches!(
        kind,
        UnitKind::Service | UnitKind::StartPhase | UnitKind::Process { background: true }
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// The unit is executing.
    Running,
    /// The unit finished but its effect keeps running until a deferred shutdown.
    Background,
    /// The result has been emitted.
    Terminal,
}

/// How [`LoggerNode::on_message`] routes engine messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkMode {
    /// Merge into the linked node's buffer unless the line was already
    /// captured there at `check` priority.
    Merge { check: Priority },
    /// Append to the linked node's buffer.
    Redirect,
}

#[derive(Debug, Clone)]
enum OutputRoute {
    Own,
    Linked { target: Weak<LoggerNode>, mode: LinkMode },
}

/// Capability to stop an external process once its owner is torn down.
pub trait ProcessControl: Send + Sync {
    /// Stops the process, returning its exit code when known.
    fn shutdown(&self) -> Result<Option<i32>, Failure>;
}

/// Process attributes written into the result record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessDetails {
    pub owner: String,
    pub command: String,
    pub return_code: i32,
}

#[derive(Debug, Default)]
struct Stopwatch {
    accumulated: Duration,
    since: Option<Instant>,
}

impl Stopwatch {
    fn start(&mut self) {
        if self.since.is_none() {
            self.since = Some(Instant::now());
        }
    }

    fn stop(&mut self) {
        if let Some(since) = self.since.take() {
            self.accumulated += since.elapsed();
        }
    }

    fn elapsed(&self) -> Duration {
        self.accumulated + self.since.map(|since| since.elapsed()).unwrap_or_default()
    }
}

struct NodeState {
    phase: Phase,
    stopwatch: Stopwatch,
    failure: Option<Failure>,
    reference: Option<String>,
    route: OutputRoute,
    process: ProcessDetails,
    control: Option<Arc<dyn ProcessControl>>,
    shutdown_requested: bool,
}

/// One node of the logger tree, mirroring one executing unit.
pub struct LoggerNode {
    id: u64,
    kind: NodeKind,
    name: String,
    parent_name: Option<String>,
    full_name: String,
    unit: UnitHandle,
    deferrable: bool,
    buffer: PriorityLineBuffer,
    registry: Weak<LoggerRegistry>,
    parent: Weak<LoggerNode>,
    this: Weak<LoggerNode>,
    state: Mutex<NodeState>,
    pub(crate) container: Option<Mutex<ContainerState>>,
}

pub(crate) struct NodeSpec {
    pub id: u64,
    pub kind: NodeKind,
    pub name: String,
    pub unit: UnitHandle,
    pub deferrable: bool,
    pub registry: Weak<LoggerRegistry>,
    pub parent: Option<Arc<LoggerNode>>,
}

impl LoggerNode {
    pub(crate) fn create(spec: NodeSpec) -> Arc<Self> {
        let parent_name = spec.parent.as_ref().map(|parent| parent.full_name.clone());
        let full_name = match &parent_name {
            Some(parent) => format!("{parent}/{}", spec.name),
            None => spec.name.clone(),
        };
        let reference = spec.unit.reference();
        let mut stopwatch = Stopwatch::default();
        stopwatch.start();
        Arc::new_cyclic(|this| LoggerNode {
            id: spec.id,
            kind: spec.kind,
            name: spec.name,
            parent_name,
            full_name,
            unit: spec.unit,
            deferrable: spec.deferrable,
            buffer: PriorityLineBuffer::new(),
            registry: spec.registry,
            parent: spec.parent.as_ref().map(Arc::downgrade).unwrap_or_default(),
            this: this.clone(),
            state: Mutex::new(NodeState {
                phase: Phase::Running,
                stopwatch,
                failure: None,
                reference,
                route: OutputRoute::Own,
                process: ProcessDetails::default(),
                control: None,
                shutdown_requested: false,
            }),
            container: spec
                .kind
                .is_container()
                .then(|| Mutex::new(ContainerState::default())),
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, NodeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn arc(&self) -> Option<Arc<LoggerNode>> {
        self.this.upgrade()
    }

    pub(crate) fn registry(&self) -> Result<Arc<LoggerRegistry>, LogError> {
        self.registry.upgrade().ok_or(LogError::RegistryShutDown)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent_name(&self) -> Option<&str> {
        self.parent_name.as_deref()
    }

    /// `parent/name`, or just `name` at the root.
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn parent(&self) -> Option<Arc<LoggerNode>> {
        self.parent.upgrade()
    }

    pub fn unit(&self) -> &UnitHandle {
        &self.unit
    }

    pub fn buffer(&self) -> &PriorityLineBuffer {
        &self.buffer
    }

    pub fn is_container(&self) -> bool {
        self.container.is_some()
    }

    /// Whether this node may outlive its unit and waits for a deferred shutdown.
    pub fn is_deferrable(&self) -> bool {
        self.deferrable
    }

    pub fn phase(&self) -> Phase {
        self.lock_state().phase
    }

    pub fn failure(&self) -> Option<Failure> {
        self.lock_state().failure.clone()
    }

    pub fn elapsed(&self) -> Duration {
        self.lock_state().stopwatch.elapsed()
    }

    pub fn reference(&self) -> Option<String> {
        self.lock_state().reference.clone()
    }

    pub fn set_reference(&self, reference: Option<String>) {
        self.lock_state().reference = reference;
    }

    pub fn process_details(&self) -> ProcessDetails {
        self.lock_state().process.clone()
    }

    pub fn set_command(&self, command: impl Into<String>) {
        self.lock_state().process.command = command.into();
    }

    pub fn set_owner(&self, owner: impl Into<String>) {
        self.lock_state().process.owner = owner.into();
    }

    pub fn set_return_code(&self, code: i32) {
        self.lock_state().process.return_code = code;
    }

    /// Attaches the capability used to stop this node's process on deferred shutdown.
    pub fn attach_process(&self, control: Arc<dyn ProcessControl>) {
        self.lock_state().control = Some(control);
    }

    /// Routes later engine messages for this node into `target`'s buffer.
    pub fn link_output(&self, target: &Arc<LoggerNode>, mode: LinkMode) {
        if std::ptr::eq(Arc::as_ptr(target), self) {
            return;
        }
        self.lock_state().route = OutputRoute::Linked {
            target: Arc::downgrade(target),
            mode,
        };
    }

    /// True when `unit` is (or resolves to) the unit this node records.
    pub fn is_unit(&self, unit: &UnitHandle) -> bool {
        self.unit.is_same_unit(unit)
    }

    /// Records `failure` unless one was already captured. Returns whether it was kept.
    pub fn record_failure(&self, failure: Failure) -> bool {
        let mut state = self.lock_state();
        if state.failure.is_some() {
            debug!(logger = %self.full_name, "ignoring later failure: {failure}");
            return false;
        }
        state.failure = Some(failure);
        true
    }

    /// Handles an engine message already mapped to a priority.
    pub fn on_message(&self, priority: Priority, text: &str) -> Result<(), LogError> {
        let route = {
            let state = self.lock_state();
            if state.phase == Phase::Terminal {
                return Err(LogError::Terminal {
                    name: self.full_name.clone(),
                });
            }
            state.route.clone()
        };
        match route {
            OutputRoute::Own => self.buffer.append(priority, text),
            OutputRoute::Linked { target, mode } => match target.upgrade() {
                Some(target) if target.phase() != Phase::Terminal => match mode {
                    LinkMode::Merge { check } => {
                        target.buffer.merge_if_absent(check, priority, text);
                    }
                    LinkMode::Redirect => target.buffer.append(priority, text),
                },
                _ => self.buffer.append(priority, text),
            },
        }
        Ok(())
    }

    /// Appends raw captured output. Output arriving after the result was
    /// written is dropped.
    pub fn append_output(&self, priority: Priority, text: &str) {
        if self.phase() == Phase::Terminal {
            warn!(logger = %self.full_name, "dropping output received after result was written");
            return;
        }
        self.buffer.append(priority, text);
    }

    /// The engine reports this node's unit as finished.
    ///
    /// Deferrable nodes move to [`Phase::Background`] and keep their result
    /// open until [`LoggerNode::shutdown_deferred`]; every other node drains
    /// its deferred children, writes its result and becomes terminal. While a
    /// deferred shutdown is in progress only the failure is recorded; the
    /// shutdown writes the result.
    pub fn on_unit_finished(&self, failure: Option<Failure>) -> Result<(), LogError> {
        let background = {
            let mut state = self.lock_state();
            if state.phase != Phase::Running {
                return Err(LogError::AlreadyFinished {
                    name: self.full_name.clone(),
                });
            }
            if let Some(failure) = failure {
                if state.failure.is_none() {
                    state.failure = Some(failure);
                }
            }
            if state.shutdown_requested {
                debug!(logger = %self.full_name, "unit finished during deferred shutdown");
                return Ok(());
            }
            if self.deferrable {
                state.phase = Phase::Background;
                true
            } else {
                state.stopwatch.stop();
                false
            }
        };
        if background {
            debug!(logger = %self.full_name, "unit finished, logger kept open in background");
            if self.is_container() {
                self.deactivate();
            }
            return Ok(());
        }
        self.finish()
    }

    /// Stops whatever keeps this node running and writes its result. Runs at
    /// most once; a failure to stop the process is returned to the caller
    /// rather than recorded on this node.
    pub fn shutdown_deferred(&self) -> Result<(), Failure> {
        let control = {
            let mut state = self.lock_state();
            if state.shutdown_requested || state.phase == Phase::Terminal {
                return Ok(());
            }
            state.shutdown_requested = true;
            state.control.clone()
        };
        debug!(logger = %self.full_name, "deferred shutdown");

        let mut result = Ok(());
        if let Some(control) = control {
            match control.shutdown() {
                Ok(Some(code)) => self.set_return_code(code),
                Ok(None) => {}
                Err(failure) => {
                    warn!(logger = %self.full_name, "failed to stop process: {failure}");
                    result = Err(failure);
                }
            }
        }

        {
            let mut state = self.lock_state();
            state.stopwatch.stop();
            if state.phase == Phase::Running {
                debug!(logger = %self.full_name, "shut down before its unit finished");
            }
        }
        if let Err(err) = self.finish() {
            warn!(logger = %self.full_name, "failed to finish after deferred shutdown: {err}");
            if result.is_ok() {
                result = Err(Failure::error(err.to_string()));
            }
        }
        result
    }

    fn finish(&self) -> Result<(), LogError> {
        if self.is_container() {
            self.stop_deferred_elements();
        }
        let emitted = self.emit();
        if self.is_container() {
            self.clear_children();
            self.deactivate();
        }
        emitted
    }

    fn emit(&self) -> Result<(), LogError> {
        let (failure, elapsed) = {
            let mut state = self.lock_state();
            if state.phase == Phase::Terminal {
                debug!(logger = %self.full_name, "result already written");
                return Ok(());
            }
            state.phase = Phase::Terminal;
            state.stopwatch.stop();
            (state.failure.clone(), state.stopwatch.elapsed())
        };
        let Some((outcome, description)) = Outcome::from_failure(failure.as_ref()) else {
            debug!(logger = %self.full_name, "excluded by selection pattern, no result written");
            return Ok(());
        };
        self.registry()?
            .write_result(self, outcome, description, elapsed)
    }
}

impl LineTarget for LoggerNode {
    fn append_line(&self, priority: Priority, text: &str) {
        self.append_output(priority, text);
    }
}

impl fmt::Debug for LoggerNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggerNode")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("full_name", &self.full_name)
            .field("phase", &self.phase())
            .finish()
    }
}

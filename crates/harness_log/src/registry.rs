use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::time::Duration;

use tracing::{debug, warn};

use crate::buffer::strip_ansi;
use crate::config::LogConfig;
use crate::container::{name_key, LoggerRef};
use crate::error::LogError;
use crate::node::{LoggerNode, NodeKind, NodeSpec, Phase};
use crate::outcome::{Failure, Outcome};
use crate::sink::{timestamp_now, JsonDirSink, NullSink, ResultRecord, ResultSink};
use crate::unit::UnitHandle;

struct RegistryState {
    next_id: u64,
    current: Weak<LoggerNode>,
    current_dir: Option<PathBuf>,
    live: Vec<Weak<LoggerNode>>,
    valid: bool,
}

/// Process-wide directory of the logger tree for one run.
///
/// Created with [`LoggerRegistry::init`] when the root unit starts and
/// invalidated by [`LoggerRegistry::shutdown`]. Initializing a new registry
/// invalidates the previous one.
pub struct LoggerRegistry {
    config: LogConfig,
    sink: Arc<dyn ResultSink>,
    root: Arc<LoggerNode>,
    state: Mutex<RegistryState>,
}

fn active_slot() -> &'static Mutex<Option<Arc<LoggerRegistry>>> {
    static SLOT: OnceLock<Mutex<Option<Arc<LoggerRegistry>>>> = OnceLock::new();
    SLOT.get_or_init(|| Mutex::new(None))
}

impl LoggerRegistry {
    /// Initializes a registry whose sink writes JSON results into
    /// `config.results_dir`, or discards them when it is unset.
    pub fn init(root_unit: UnitHandle, config: LogConfig) -> Result<Arc<Self>, LogError> {
        let sink: Arc<dyn ResultSink> = match &config.results_dir {
            Some(dir) => Arc::new(JsonDirSink::new(dir)?),
            None => Arc::new(NullSink),
        };
        Ok(Self::init_with_sink(root_unit, config, sink))
    }

    pub fn init_with_sink(
        root_unit: UnitHandle,
        config: LogConfig,
        sink: Arc<dyn ResultSink>,
    ) -> Arc<Self> {
        let registry = Arc::new_cyclic(|this: &Weak<LoggerRegistry>| {
            let root = LoggerNode::create(NodeSpec {
                id: 0,
                kind: NodeKind::Root,
                name: root_unit.name(),
                unit: root_unit,
                deferrable: false,
                registry: this.clone(),
                parent: None,
            });
            LoggerRegistry {
                config,
                sink,
                state: Mutex::new(RegistryState {
                    next_id: 1,
                    current: Weak::new(),
                    current_dir: None,
                    live: vec![Arc::downgrade(&root)],
                    valid: true,
                }),
                root,
            }
        });
        registry.root.activate();

        let previous = active_slot()
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Arc::clone(&registry));
        if let Some(previous) = previous {
            if previous.is_valid() {
                warn!(
                    root = %previous.root.full_name(),
                    "logger registry replaced before shutdown"
                );
                previous.invalidate();
            }
        }
        debug!(root = %registry.root.full_name(), "logger registry initialized");
        registry
    }

    /// The registry of the run in progress, if any.
    pub fn current() -> Option<Arc<Self>> {
        active_slot()
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    pub fn root(&self) -> &Arc<LoggerNode> {
        &self.root
    }

    pub fn is_valid(&self) -> bool {
        self.lock().valid
    }

    fn invalidate(&self) {
        self.lock().valid = false;
    }

    pub fn next_id(&self) -> Result<u64, LogError> {
        let mut state = self.lock();
        if !state.valid {
            return Err(LogError::RegistryShutDown);
        }
        let id = state.next_id;
        state.next_id += 1;
        Ok(id)
    }

    pub(crate) fn register(&self, node: &Arc<LoggerNode>) {
        let mut state = self.lock();
        state.live.retain(|weak| weak.strong_count() > 0);
        state.live.push(Arc::downgrade(node));
    }

    pub fn current_container(&self) -> Option<Arc<LoggerNode>> {
        self.lock().current.upgrade()
    }

    /// Scratch directory matching the current container's full name.
    pub fn current_dir(&self) -> Option<PathBuf> {
        self.lock().current_dir.clone()
    }

    pub fn set_current_container(&self, node: &Arc<LoggerNode>) {
        let mut state = self.lock();
        if std::ptr::eq(state.current.as_ptr(), Arc::as_ptr(node)) {
            return;
        }
        state.current = Arc::downgrade(node);
        let dir = self.config.scratch_root.join(node.full_name());
        debug!(logger = %node.full_name(), dir = %dir.display(), "current container changed");
        state.current_dir = Some(dir);
    }

    /// Open logger recording `unit`, most recently created first.
    pub fn logger_for(&self, unit: &UnitHandle) -> Option<Arc<LoggerNode>> {
        let live: Vec<Weak<LoggerNode>> = self.lock().live.clone();
        live.iter()
            .rev()
            .filter_map(Weak::upgrade)
            .find(|node| node.phase() != Phase::Terminal && node.is_unit(unit))
    }

    /// Resolves a logger for assertions.
    ///
    /// Children of the current container are tried first. Names then fall
    /// back to the deferred stacks of the current container and its
    /// ancestors, and finally to `owner/name` cross-references against the
    /// open loggers.
    pub fn lookup(&self, target: &LoggerRef) -> Option<Arc<LoggerNode>> {
        let current = self
            .current_container()
            .unwrap_or_else(|| Arc::clone(&self.root));
        if let Some(found) = current.find_child(target) {
            return Some(found);
        }
        let LoggerRef::Name(name) = target else {
            return None;
        };
        let mut scope = Some(current);
        while let Some(container) = scope {
            if let Some(found) = container.find_deferred(name) {
                return Some(found);
            }
            scope = container.parent();
        }
        self.lookup_cross_reference(name)
    }

    fn lookup_cross_reference(&self, qualified: &str) -> Option<Arc<LoggerNode>> {
        let (owner, leaf) = qualified.rsplit_once('/')?;
        let (owner, leaf, qualified) = (name_key(owner), name_key(leaf), name_key(qualified));
        let live: Vec<Weak<LoggerNode>> = self.lock().live.clone();
        live.iter()
            .rev()
            .filter_map(Weak::upgrade)
            .filter(|node| node.phase() != Phase::Terminal)
            .find(|node| {
                let owned = node
                    .reference()
                    .is_some_and(|reference| name_key(&reference) == owner);
                (owned && name_key(node.name()) == leaf) || name_key(node.full_name()) == qualified
            })
    }

    /// The engine started `unit`; returns the logger to associate with it.
    pub fn unit_started(&self, unit: &UnitHandle) -> Result<Option<Arc<LoggerNode>>, LogError> {
        if self.root.is_unit(unit) {
            return Ok(Some(Arc::clone(&self.root)));
        }
        let container = self
            .current_container()
            .unwrap_or_else(|| Arc::clone(&self.root));
        container.on_unit_started(unit)
    }

    /// The engine finished `unit`. Finishing the root unit shuts the registry down.
    pub fn unit_finished(
        &self,
        unit: &UnitHandle,
        failure: Option<Failure>,
    ) -> Result<(), LogError> {
        if self.root.is_unit(unit) {
            return self.shutdown(failure);
        }
        match self.logger_for(unit) {
            Some(node) => node.on_unit_finished(failure),
            None => {
                debug!(unit = ?unit, "finished unit has no open logger");
                Ok(())
            }
        }
    }

    /// Maps the engine severity and appends `text` to the unit's logger, or to
    /// the current container when the unit has none.
    pub fn message_logged(
        &self,
        unit: &UnitHandle,
        severity: i32,
        text: &str,
    ) -> Result<(), LogError> {
        let priority = self.config.severity_map.map(severity);
        let node = self
            .logger_for(unit)
            .or_else(|| self.current_container())
            .unwrap_or_else(|| Arc::clone(&self.root));
        node.on_message(priority, text)
    }

    /// Hands the finished result of `node` to the sink.
    pub fn write_result(
        &self,
        node: &LoggerNode,
        outcome: Outcome,
        description: String,
        elapsed: Duration,
    ) -> Result<(), LogError> {
        if !self.is_valid() {
            return Err(LogError::RegistryShutDown);
        }
        let mut output = node.buffer().runs();
        if self.config.strip_ansi_in_results {
            for run in &mut output {
                run.text = strip_ansi(&run.text).into_owned();
            }
        }
        let process = node.process_details();
        let record = ResultRecord {
            kind: node.kind().as_str(),
            sequence_id: node.id(),
            name: node.name().to_string(),
            full_name: node.full_name().to_string(),
            parent_name: node.parent_name().map(str::to_string),
            reference: node.reference(),
            outcome,
            description,
            elapsed_seconds: elapsed.as_secs_f64(),
            owner: process.owner,
            command: process.command,
            return_code: process.return_code,
            output,
            finished_at: timestamp_now()?,
        };
        self.sink.write(&record)?;
        debug!(logger = %record.full_name, outcome = outcome.as_str(), "result written");
        Ok(())
    }

    /// Finishes the root with an optional top-level failure and invalidates
    /// this registry.
    pub fn shutdown(&self, failure: Option<Failure>) -> Result<(), LogError> {
        if !self.is_valid() {
            return Err(LogError::RegistryShutDown);
        }
        let result = self.root.on_unit_finished(failure);
        self.invalidate();
        let mut slot = active_slot().lock().unwrap_or_else(PoisonError::into_inner);
        if slot
            .as_ref()
            .is_some_and(|active| std::ptr::eq(Arc::as_ptr(active), self))
        {
            *slot = None;
        }
        debug!(root = %self.root.full_name(), "logger registry shut down");
        result
    }
}

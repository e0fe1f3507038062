use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::error::LogError;
use crate::node::{outlives_unit, LoggerNode, NodeKind, NodeSpec, Phase};
use crate::outcome::Failure;
use crate::unit::UnitHandle;

/// Something a container must stop once it is torn down itself.
pub trait DeferredShutdown: Send + Sync {
    fn label(&self) -> String;
    fn deferred_shutdown(&self) -> Result<(), Failure>;
}

impl DeferredShutdown for LoggerNode {
    fn label(&self) -> String {
        self.full_name().to_string()
    }

    fn deferred_shutdown(&self) -> Result<(), Failure> {
        self.shutdown_deferred()
    }
}

struct DeferredEntry {
    handle: Arc<dyn DeferredShutdown>,
    node: Option<Arc<LoggerNode>>,
}

#[derive(Default)]
pub(crate) struct ContainerState {
    active: bool,
    children: Vec<Arc<LoggerNode>>,
    names: HashMap<String, usize>,
    deferred: Vec<DeferredEntry>,
}

/// Addresses a child logger by name or by 1-based position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoggerRef {
    /// Case-insensitive name.
    Name(String),
    /// Positive counts from the first child, negative from the last.
    Ordinal(i64),
}

impl LoggerRef {
    pub fn name(name: impl Into<String>) -> Self {
        LoggerRef::Name(name.into())
    }
}

impl FromStr for LoggerRef {
    type Err = std::convert::Infallible;

    /// Non-zero integers are ordinals, anything else a name.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        Ok(match trimmed.parse::<i64>() {
            Ok(ordinal) if ordinal != 0 => LoggerRef::Ordinal(ordinal),
            _ => LoggerRef::Name(trimmed.to_string()),
        })
    }
}

impl fmt::Display for LoggerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoggerRef::Name(name) => f.write_str(name),
            LoggerRef::Ordinal(ordinal) => write!(f, "#{ordinal}"),
        }
    }
}

pub(crate) fn name_key(name: &str) -> String {
    name.to_lowercase()
}

fn unique_name(names: &HashMap<String, usize>, declared: &str) -> String {
    if !names.contains_key(&name_key(declared)) {
        return declared.to_string();
    }
    (1usize..)
        .map(|suffix| format!("{declared}_{suffix}"))
        .find(|candidate| !names.contains_key(&name_key(candidate)))
        .unwrap_or_else(|| declared.to_string())
}

impl LoggerNode {
    fn container_state(&self) -> Option<MutexGuard<'_, ContainerState>> {
        self.container
            .as_ref()
            .map(|state| state.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn is_active(&self) -> bool {
        self.container_state().map(|state| state.active).unwrap_or(false)
    }

    /// Makes this container the one accepting new children.
    ///
    /// Any active ancestor or descendant is deactivated first, so at most one
    /// container is active on every root-to-leaf path.
    pub fn activate(&self) {
        if !self.is_container() {
            return;
        }
        let mut ancestor = self.parent();
        while let Some(node) = ancestor {
            if let Some(mut state) = node.container_state() {
                state.active = false;
            }
            ancestor = node.parent();
        }
        self.deactivate_descendants();
        if let Some(mut state) = self.container_state() {
            state.active = true;
        }
        if let (Ok(registry), Some(this)) = (self.registry(), self.arc()) {
            registry.set_current_container(&this);
        }
    }

    /// Gives activation back to the parent container, if it is still open.
    pub fn deactivate(&self) {
        if let Some(mut state) = self.container_state() {
            state.active = false;
        }
        if let Some(parent) = self.parent() {
            if parent.phase() != Phase::Terminal {
                parent.activate();
            }
        }
    }

    fn deactivate_descendants(&self) {
        let nested: Vec<Arc<LoggerNode>> = match self.container_state() {
            Some(state) => state
                .children
                .iter()
                .cloned()
                .chain(state.deferred.iter().filter_map(|entry| entry.node.clone()))
                .filter(|node| node.is_container())
                .collect(),
            None => return,
        };
        for node in nested {
            if let Some(mut state) = node.container_state() {
                state.active = false;
            }
            node.deactivate_descendants();
        }
    }

    /// Creates the child logger for a unit the engine just started.
    ///
    /// Returns `Ok(None)` when this container is inactive or the unit kind
    /// gets no logger. The child is registered (and so has its id) before it
    /// is returned; deferrable children are also pushed on the deferred stack.
    pub fn on_unit_started(&self, unit: &UnitHandle) -> Result<Option<Arc<LoggerNode>>, LogError> {
        if !self.is_container() {
            return Err(LogError::NotAContainer {
                name: self.full_name().to_string(),
            });
        }
        if !self.is_active() {
            warn!(
                logger = %self.full_name(),
                unit = ?unit,
                "ignoring unit started on inactive container"
            );
            return Ok(None);
        }
        let unit_kind = unit.kind();
        let Some(kind) = NodeKind::for_unit(unit_kind) else {
            return Ok(None);
        };
        let registry = self.registry()?;
        let id = registry.next_id()?;
        let parent = self.arc();
        let deferrable = outlives_unit(unit_kind);

        let child = {
            let Some(mut state) = self.container_state() else {
                return Ok(None);
            };
            let name = unique_name(&state.names, &unit.name());
            let child = LoggerNode::create(NodeSpec {
                id,
                kind,
                name,
                unit: unit.clone(),
                deferrable,
                registry: Arc::downgrade(&registry),
                parent,
            });
            let index = state.children.len();
            state.names.insert(name_key(child.name()), index);
            state.children.push(Arc::clone(&child));
            if deferrable {
                state.deferred.push(DeferredEntry {
                    handle: Arc::clone(&child) as Arc<dyn DeferredShutdown>,
                    node: Some(Arc::clone(&child)),
                });
            }
            child
        };

        registry.register(&child);
        debug!(
            logger = %child.full_name(),
            id = child.id(),
            kind = child.kind().as_str(),
            deferrable,
            "logger started"
        );
        if child.is_container() {
            child.activate();
        }
        Ok(Some(child))
    }

    /// Pushes a host-provided capability on the deferred stack.
    pub fn defer(&self, handle: Arc<dyn DeferredShutdown>) -> Result<(), LogError> {
        let Some(mut state) = self.container_state() else {
            return Err(LogError::NotAContainer {
                name: self.full_name().to_string(),
            });
        };
        state.deferred.push(DeferredEntry { handle, node: None });
        Ok(())
    }

    pub fn deferred_len(&self) -> usize {
        self.container_state()
            .map(|state| state.deferred.len())
            .unwrap_or(0)
    }

    /// Shuts down every deferred entry, most recent first.
    ///
    /// The container is reactivated first so output produced while shutting
    /// down still has a home. A failing entry is recorded as this container's
    /// failure and the drain continues.
    pub fn stop_deferred_elements(&self) {
        if !self.is_container() {
            return;
        }
        self.activate();
        loop {
            let entry = match self.container_state() {
                Some(mut state) => state.deferred.pop(),
                None => None,
            };
            let Some(entry) = entry else {
                break;
            };
            let label = entry.handle.label();
            debug!(logger = %self.full_name(), deferred = %label, "stopping deferred element");
            if let Err(failure) = entry.handle.deferred_shutdown() {
                warn!(
                    logger = %self.full_name(),
                    deferred = %label,
                    "deferred shutdown failed: {failure}"
                );
                self.record_failure(failure);
            }
        }
    }

    pub(crate) fn clear_children(&self) {
        if let Some(mut state) = self.container_state() {
            state.children.clear();
            state.names.clear();
        }
    }

    pub fn children(&self) -> Vec<Arc<LoggerNode>> {
        self.container_state()
            .map(|state| state.children.clone())
            .unwrap_or_default()
    }

    /// Resolves a direct child; out-of-range ordinals resolve to `None`.
    pub fn find_child(&self, target: &LoggerRef) -> Option<Arc<LoggerNode>> {
        let state = self.container_state()?;
        match target {
            LoggerRef::Name(name) => state
                .names
                .get(&name_key(name))
                .and_then(|&index| state.children.get(index))
                .cloned(),
            LoggerRef::Ordinal(ordinal) => {
                let len = i64::try_from(state.children.len()).ok()?;
                let index = match *ordinal {
                    n if n > 0 && n <= len => n - 1,
                    n if n < 0 && n >= -len => len + n,
                    _ => return None,
                };
                state.children.get(usize::try_from(index).ok()?).cloned()
            }
        }
    }

    /// Searches the deferred stack (and the deferred stacks below it) for a
    /// logger called `name`, most recently deferred first.
    pub fn find_deferred(&self, name: &str) -> Option<Arc<LoggerNode>> {
        let nodes: Vec<Arc<LoggerNode>> = self
            .container_state()?
            .deferred
            .iter()
            .rev()
            .filter_map(|entry| entry.node.clone())
            .collect();
        let key = name_key(name);
        if let Some(found) = nodes.iter().find(|node| name_key(node.name()) == key) {
            return Some(Arc::clone(found));
        }
        nodes.iter().find_map(|node| node.find_deferred(name))
    }
}

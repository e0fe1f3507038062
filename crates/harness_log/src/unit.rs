use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::error::LogError;

/// Kind of work unit declared by the host engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitKind {
    /// Pure structural unit; never gets a logger of its own.
    Structural,
    Suite,
    TestCase,
    Service,
    StartPhase,
    VerifyPhase,
    StopPhase,
    Task,
    Process { background: bool },
}

/// Opaque, cheaply clonable handle to a unit owned by the host engine.
///
/// A handle is either concrete or a placeholder bound later with
/// [`UnitHandle::resolve`]. Identity is the host key of the resolved unit, so
/// a placeholder matches its target both before and after binding.
#[derive(Clone)]
pub struct UnitHandle {
    inner: Arc<UnitInner>,
}

struct UnitInner {
    key: u64,
    kind: UnitKind,
    name: String,
    reference: Option<String>,
    target: OnceLock<UnitHandle>,
    placeholder: bool,
}

impl UnitHandle {
    pub fn new(key: u64, kind: UnitKind, name: impl Into<String>) -> Self {
        Self::build(key, kind, name.into(), None, false)
    }

    /// A unit whose logger output belongs to the unit named by `reference`
    /// (for example the service a process was started for).
    pub fn with_reference(
        key: u64,
        kind: UnitKind,
        name: impl Into<String>,
        reference: impl Into<String>,
    ) -> Self {
        Self::build(key, kind, name.into(), Some(reference.into()), false)
    }

    pub fn placeholder(key: u64, kind: UnitKind, name: impl Into<String>) -> Self {
        Self::build(key, kind, name.into(), None, true)
    }

    fn build(
        key: u64,
        kind: UnitKind,
        name: String,
        reference: Option<String>,
        placeholder: bool,
    ) -> Self {
        Self {
            inner: Arc::new(UnitInner {
                key,
                kind,
                name,
                reference,
                target: OnceLock::new(),
                placeholder,
            }),
        }
    }

    /// Binds a placeholder to its real unit. Binding twice is an error.
    pub fn resolve(&self, target: UnitHandle) -> Result<(), LogError> {
        if !self.inner.placeholder {
            return Err(LogError::PlaceholderBound {
                name: self.inner.name.clone(),
            });
        }
        self.inner
            .target
            .set(target)
            .map_err(|_| LogError::PlaceholderBound {
                name: self.inner.name.clone(),
            })
    }

    /// Follows placeholder bindings to the unit currently standing for this handle.
    pub fn resolved(&self) -> UnitHandle {
        let mut current = self.clone();
        while let Some(next) = current.inner.target.get() {
            current = next.clone();
        }
        current
    }

    pub fn is_placeholder(&self) -> bool {
        self.inner.placeholder
    }

    pub fn is_same_unit(&self, other: &UnitHandle) -> bool {
        if Arc::ptr_eq(&self.inner, &other.inner) {
            return true;
        }
        let (left, right) = (self.resolved(), other.resolved());
        Arc::ptr_eq(&left.inner, &right.inner) || left.inner.key == right.inner.key
    }

    pub fn key(&self) -> u64 {
        self.resolved().inner.key
    }

    pub fn kind(&self) -> UnitKind {
        self.resolved().inner.kind
    }

    pub fn name(&self) -> String {
        self.resolved().inner.name.clone()
    }

    pub fn reference(&self) -> Option<String> {
        self.resolved().inner.reference.clone()
    }
}

impl fmt::Debug for UnitHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let resolved = self.resolved();
        f.debug_struct("UnitHandle")
            .field("key", &resolved.inner.key)
            .field("kind", &resolved.inner.kind)
            .field("name", &resolved.inner.name)
            .field("placeholder", &self.inner.placeholder)
            .finish()
    }
}

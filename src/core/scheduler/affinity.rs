//! Execution affinities.
//!
//! An affinity is the property a thread must have for a work item to run on
//! it. Worker threads bind the scheduler's affinity once, before their loop
//! starts; application threads may claim it too, after which work submitted
//! from them runs inline.

use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::core::AffinityError;

use super::WorkerIdentity;

static NEXT_TAG: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static BOUND_TAG: Cell<Option<AffinityTag>> = const { Cell::new(None) };
}

/// Thread-local capability tag, the default affinity kind.
///
/// A thread carries at most one tag for its whole life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AffinityTag(u64);

impl AffinityTag {
    /// Allocate a process-unique tag.
    #[must_use]
    pub fn new() -> Self {
        Self(NEXT_TAG.fetch_add(1, Ordering::Relaxed))
    }

    /// Numeric tag value.
    #[must_use]
    pub const fn id(self) -> u64 {
        self.0
    }

    /// Tag bound to the calling thread, if any.
    #[must_use]
    pub fn current() -> Option<Self> {
        BOUND_TAG.with(Cell::get)
    }

    /// Whether the calling thread carries this tag.
    #[must_use]
    pub fn is_current(self) -> bool {
        Self::current() == Some(self)
    }

    /// Bind the calling thread to this tag. Rebinding the same tag is a no-op.
    ///
    /// # Errors
    ///
    /// [`AffinityError::AlreadyBound`] if the thread carries a different tag.
    pub fn bind_current_thread(self) -> Result<(), AffinityError> {
        BOUND_TAG.with(|bound| match bound.get() {
            None => {
                bound.set(Some(self));
                Ok(())
            }
            Some(existing) if existing == self => Ok(()),
            Some(existing) => Err(AffinityError::AlreadyBound(existing.to_string())),
        })
    }
}

impl Default for AffinityTag {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AffinityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tag#{}", self.0)
    }
}

/// Caller-supplied affinity strategy.
///
/// `bind` runs once on every worker thread before it accepts work;
/// `is_satisfied` runs on submitting threads to decide inline execution.
pub trait AffinityBinding: Send + Sync {
    /// Human-readable name for diagnostics.
    fn label(&self) -> String;

    /// Establish the affinity on the calling worker thread.
    ///
    /// # Errors
    ///
    /// Returning an error aborts scheduler construction.
    fn bind(&self, worker: &WorkerIdentity) -> Result<(), AffinityError>;

    /// Whether the calling thread already satisfies the affinity.
    fn is_satisfied(&self) -> bool;
}

/// The affinity a scheduler's workers run under.
#[derive(Clone)]
pub enum Affinity {
    /// Threads carrying this tag satisfy the affinity.
    Tagged(AffinityTag),
    /// A caller-supplied strategy.
    Custom(Arc<dyn AffinityBinding>),
}

impl Affinity {
    /// Affinity backed by a freshly allocated tag.
    #[must_use]
    pub fn new_tagged() -> Self {
        Self::Tagged(AffinityTag::new())
    }

    /// Wrap a caller-supplied strategy.
    pub fn custom(binding: impl AffinityBinding + 'static) -> Self {
        Self::Custom(Arc::new(binding))
    }

    /// The tag, for tagged affinities.
    #[must_use]
    pub fn tag(&self) -> Option<AffinityTag> {
        match self {
            Self::Tagged(tag) => Some(*tag),
            Self::Custom(_) => None,
        }
    }

    /// Diagnostic name.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Tagged(tag) => tag.to_string(),
            Self::Custom(binding) => binding.label(),
        }
    }

    /// Whether the calling thread satisfies this affinity.
    #[must_use]
    pub fn is_satisfied(&self) -> bool {
        match self {
            Self::Tagged(tag) => tag.is_current(),
            Self::Custom(binding) => binding.is_satisfied(),
        }
    }

    pub(crate) fn bind(&self, worker: &WorkerIdentity) -> Result<(), AffinityError> {
        match self {
            Self::Tagged(tag) => tag.bind_current_thread(),
            Self::Custom(binding) => binding.bind(worker),
        }
    }
}

impl Default for Affinity {
    fn default() -> Self {
        Self::new_tagged()
    }
}

impl fmt::Debug for Affinity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tagged(tag) => f.debug_tuple("Tagged").field(tag).finish(),
            Self::Custom(binding) => f.debug_tuple("Custom").field(&binding.label()).finish(),
        }
    }
}

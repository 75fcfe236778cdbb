//! The matcher tree.
//!
//! A [Matcher] takes frames of one or more streams and hands
//! synchronized output to a single callback. [IdentityMatcher] forwards
//! frames untouched; [CompositeMatcher] stages the output of its
//! children and groups it under a [MatchPolicy](crate::policy::MatchPolicy).

mod composite;
mod identity;

pub use composite::{CompositeMatcher, MatcherStats};
pub use identity::IdentityMatcher;

use crate::types::{Frame, FrameSource, StreamId, SyncCallback};
use eyre::Result;
use std::{
    fmt,
    sync::{PoisonError, RwLock},
};

/// A component that accepts frames and produces synchronized output.
pub trait Matcher<F>: Send + Sync
where
    F: Frame,
{
    /// Consumes a frame. Zero or more units may be delivered to the
    /// callback before this returns.
    fn dispatch(&self, frame: F, source: &dyn FrameSource<F>) -> Result<()>;

    /// The streams this matcher and its descendants are responsible for.
    fn streams(&self) -> Vec<StreamId>;

    /// Registers the sink for emitted units, replacing any previous one.
    fn set_callback(&self, callback: SyncCallback<F>);

    /// Registers the sink for frames that leave without being matched.
    fn set_unmatched_callback(&self, _callback: SyncCallback<F>) {}

    /// Emits every staged frame without waiting for missing streams.
    fn flush(&self, _source: &dyn FrameSource<F>) -> Result<()> {
        Ok(())
    }

    /// Removes every staged frame, descendants first.
    fn drain(&self) -> Result<Vec<F>> {
        Ok(vec![])
    }
}

/// Identifies a child within one composite matcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChildId(pub usize);

impl fmt::Display for ChildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Holds the single registered callback of a matcher.
pub(crate) struct CallbackSlot<F>
where
    F: Frame,
{
    callback: RwLock<Option<SyncCallback<F>>>,
}

impl<F> CallbackSlot<F>
where
    F: Frame,
{
    pub fn new() -> Self {
        Self {
            callback: RwLock::new(None),
        }
    }

    pub fn set(&self, callback: SyncCallback<F>) {
        *self
            .callback
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    pub fn get(&self) -> Option<SyncCallback<F>> {
        self.callback
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

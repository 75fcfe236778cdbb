//! Decision policies for composite matchers.

mod frame_number;
mod timestamp;

pub use frame_number::FrameNumberPolicy;
pub use timestamp::TimestampPolicy;

use crate::{config::PolicyKind, matcher::ChildId, types::Frame};
use eyre::Result;

/// The hooks a composite matcher consults while grouping frames.
pub trait MatchPolicy<F>: Send + Sync
where
    F: Frame,
{
    fn name(&self) -> &'static str;

    /// Checks a frame before it enters the matcher tree.
    fn admit(&self, _frame: &F) -> Result<()> {
        Ok(())
    }

    /// Whether two frames represent the same moment.
    fn are_equivalent(&self, a: &F, b: &F) -> bool;

    /// Whether `a` strictly precedes `b`.
    fn is_smaller_than(&self, a: &F, b: &F) -> bool;

    /// Whether a round holding `synced` must wait for the `missing` child.
    fn wait_for_stream(&self, synced: &F, missing: ChildId) -> bool;

    /// Called when a frame is about to be forwarded into the child
    /// `child`, before it can take part in a round.
    fn on_dispatched(&self, _child: ChildId, _sample: FrameSample) {}
}

/// Timing of a dispatched frame, captured before the frame is moved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSample {
    pub timestamp: f64,
    pub frame_rate: f64,
}

impl FrameSample {
    pub fn of<F>(frame: &F) -> Self
    where
        F: Frame,
    {
        Self {
            timestamp: frame.timestamp(),
            frame_rate: frame.frame_rate(),
        }
    }
}

/// The interval between frames in milliseconds, or None if the frame
/// rate is not a positive finite number.
pub fn frame_interval(frame_rate: f64) -> Option<f64> {
    (frame_rate.is_finite() && frame_rate > 0.0).then(|| 1000.0 / frame_rate)
}

impl PolicyKind {
    pub fn build<F>(self) -> Box<dyn MatchPolicy<F>>
    where
        F: Frame,
    {
        match self {
            PolicyKind::FrameNumber => Box::new(FrameNumberPolicy),
            PolicyKind::Timestamp => Box::new(TimestampPolicy::new()),
        }
    }
}

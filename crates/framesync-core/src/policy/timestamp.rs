use super::{FrameSample, MatchPolicy, frame_interval};
use crate::{matcher::ChildId, types::Frame};
use eyre::{Result, ensure};
use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

/// Groups frames whose timestamps lie within half a frame interval of
/// each other, using the slower of the two streams.
///
/// The policy predicts when each child's next frame is due. A missing
/// child is waited for while its prediction coincides with the group
/// being formed.
#[derive(Debug, Default)]
pub struct TimestampPolicy {
    next_expected: Mutex<HashMap<ChildId, f64>>,
}

impl TimestampPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// The predicted timestamp of the next frame of `child`.
    pub fn next_expected(&self, child: ChildId) -> Option<f64> {
        self.next_expected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&child)
            .copied()
    }
}

/// Whether two timestamps fall within half a frame interval at `frame_rate`.
pub fn timestamps_equivalent(a: f64, b: f64, frame_rate: f64) -> bool {
    match frame_interval(frame_rate) {
        Some(gap) => (a - b).abs() < gap / 2.0,
        None => false,
    }
}

impl<F> MatchPolicy<F> for TimestampPolicy
where
    F: Frame,
{
    fn name(&self) -> &'static str {
        "timestamp"
    }

    fn admit(&self, frame: &F) -> Result<()> {
        let frame_rate = frame.frame_rate();
        ensure!(
            frame_interval(frame_rate).is_some(),
            "invalid frame rate {} on {} frame #{}",
            frame_rate,
            frame.stream_type(),
            frame.frame_number()
        );
        Ok(())
    }

    fn are_equivalent(&self, a: &F, b: &F) -> bool {
        let frame_rate = a.frame_rate().min(b.frame_rate());
        timestamps_equivalent(a.timestamp(), b.timestamp(), frame_rate)
    }

    fn is_smaller_than(&self, a: &F, b: &F) -> bool {
        a.timestamp() < b.timestamp()
    }

    fn wait_for_stream(&self, synced: &F, missing: ChildId) -> bool {
        match self.next_expected(missing) {
            Some(next) => timestamps_equivalent(synced.timestamp(), next, synced.frame_rate()),
            // declared but never seen
            None => true,
        }
    }

    fn on_dispatched(&self, child: ChildId, sample: FrameSample) {
        let Some(gap) = frame_interval(sample.frame_rate) else {
            return;
        };

        self.next_expected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(child, sample.timestamp + gap);
    }
}

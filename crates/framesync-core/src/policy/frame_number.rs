use super::MatchPolicy;
use crate::{matcher::ChildId, types::Frame};

/// Groups frames carrying the same frame number.
///
/// Frame numbers say nothing about when the next frame of a stream is
/// due, so a stream without a staged frame is always waited for.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameNumberPolicy;

impl<F> MatchPolicy<F> for FrameNumberPolicy
where
    F: Frame,
{
    fn name(&self) -> &'static str {
        "frame_number"
    }

    fn are_equivalent(&self, a: &F, b: &F) -> bool {
        a.frame_number() == b.frame_number()
    }

    fn is_smaller_than(&self, a: &F, b: &F) -> bool {
        a.frame_number() < b.frame_number()
    }

    fn wait_for_stream(&self, _synced: &F, _missing: ChildId) -> bool {
        true
    }
}

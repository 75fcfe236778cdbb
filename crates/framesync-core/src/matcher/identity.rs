use super::{CallbackSlot, Matcher};
use crate::types::{Frame, FrameSource, StreamId, SyncCallback};
use eyre::Result;
use tracing::debug;

/// A leaf matcher for a single stream. Every frame is handed to the
/// callback as soon as it arrives.
pub struct IdentityMatcher<F>
where
    F: Frame,
{
    stream: StreamId,
    callback: CallbackSlot<F>,
}

impl<F> IdentityMatcher<F>
where
    F: Frame,
{
    pub fn new(stream: StreamId) -> Self {
        Self {
            stream,
            callback: CallbackSlot::new(),
        }
    }

    pub fn stream(&self) -> StreamId {
        self.stream
    }
}

impl<F> Matcher<F> for IdentityMatcher<F>
where
    F: Frame,
{
    fn dispatch(&self, frame: F, source: &dyn FrameSource<F>) -> Result<()> {
        match self.callback.get() {
            Some(callback) => callback(frame, source),
            None => {
                debug!(stream = %self.stream, "no callback registered; dropping frame");
                Ok(())
            }
        }
    }

    fn streams(&self) -> Vec<StreamId> {
        vec![self.stream]
    }

    fn set_callback(&self, callback: SyncCallback<F>) {
        self.callback.set(callback);
    }
}

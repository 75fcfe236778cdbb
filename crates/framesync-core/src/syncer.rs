use crate::{
    config::{ShutdownPolicy, SyncConfig},
    matcher::{CompositeMatcher, Matcher, MatcherStats},
    types::{Frame, FrameSource, StreamId, sync_callback},
};
use eyre::Result;
use std::sync::Arc;
use tracing::info;

/// The synchronization driver. It owns the root composite matcher,
/// dispatches incoming frames into it and republishes whatever the tree
/// emits to the registered callback.
///
/// `dispatch` may be called concurrently from several capture threads.
/// Callbacks run on the dispatching thread and must not dispatch back
/// into the same synchronizer.
pub struct Syncer<F>
where
    F: Frame,
{
    root: Arc<CompositeMatcher<F>>,
    source: Arc<dyn FrameSource<F>>,
    shutdown: ShutdownPolicy,
}

impl<F> Syncer<F>
where
    F: Frame,
{
    pub fn new(config: SyncConfig, source: Arc<dyn FrameSource<F>>) -> Result<Self> {
        let root = CompositeMatcher::from_config(&config)?;
        Ok(Self {
            root,
            source,
            shutdown: config.shutdown,
        })
    }

    /// Create a synchronizer whose root starts out with the given
    /// children, in addition to the streams declared in `config`.
    pub fn with_matchers<I>(
        config: SyncConfig,
        source: Arc<dyn FrameSource<F>>,
        matchers: I,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = Arc<dyn Matcher<F>>>,
    {
        let syncer = Self::new(config, source)?;
        for matcher in matchers {
            syncer.root.register(matcher)?;
        }
        Ok(syncer)
    }

    /// Registers the sink receiving every emitted unit.
    pub fn set_callback<C>(&self, callback: C)
    where
        C: Fn(F, &dyn FrameSource<F>) -> Result<()> + Send + Sync + 'static,
    {
        self.root.set_callback(sync_callback(callback));
    }

    /// Registers the sink receiving frames that leave unmatched.
    pub fn set_unmatched_callback<C>(&self, callback: C)
    where
        C: Fn(F, &dyn FrameSource<F>) -> Result<()> + Send + Sync + 'static,
    {
        self.root.set_unmatched_callback(sync_callback(callback));
    }

    pub fn dispatch(&self, frame: F) -> Result<()> {
        self.root.dispatch(frame, &*self.source)
    }

    pub fn streams(&self) -> Vec<StreamId> {
        self.root.streams()
    }

    /// Counters of the root matcher.
    pub fn stats(&self) -> Result<MatcherStats> {
        self.root.stats()
    }

    pub fn root(&self) -> &Arc<CompositeMatcher<F>> {
        &self.root
    }

    /// Disposes of staged frames according to the shutdown policy.
    pub fn shutdown(self) -> Result<()> {
        match self.shutdown {
            ShutdownPolicy::Flush => {
                self.root.flush(&*self.source)?;
                info!("synchronizer flushed and shut down");
            }
            ShutdownPolicy::Release => {
                let released = self.root.release(&*self.source)?;
                info!(released, "synchronizer shut down");
            }
        }
        Ok(())
    }
}

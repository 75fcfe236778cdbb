use super::{CallbackSlot, ChildId, IdentityMatcher, Matcher};
use crate::{
    config::{DropPolicy, QueueLimits, SyncConfig},
    policy::{FrameNumberPolicy, FrameSample, MatchPolicy, TimestampPolicy},
    queue::{FrameQueue, Staged},
    types::{
        CompositeAllocError, DeviceRef, Frame, FrameSource, StreamId, SyncCallback, sync_callback,
    },
};
use eyre::{Result, WrapErr, bail, eyre};
use indexmap::IndexMap;
use itertools::Itertools;
use std::{
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak,
    },
    time::Instant,
};
use tracing::{debug, trace, warn};

/// Counters kept by a composite matcher.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatcherStats {
    pub groups_emitted: u64,
    pub rounds_abandoned: u64,
    pub frames_evicted: u64,
    pub queued: usize,
}

/// Routes frames to lazily created children and groups their output.
///
/// Each child owns a FIFO queue. Whenever a child emits a frame, the
/// queue heads are compared under the [MatchPolicy]; the earliest set of
/// equivalent heads is emitted as one composite frame unless the policy
/// asks to wait for a child that has nothing staged.
pub struct CompositeMatcher<F>
where
    F: Frame,
{
    policy: Box<dyn MatchPolicy<F>>,
    limits: QueueLimits,
    tree: RwLock<MatcherTree<F>>,
    state: Mutex<GroupingState<F>>,
    callback: CallbackSlot<F>,
    unmatched: CallbackSlot<F>,
    this: Weak<Self>,
}

struct MatcherTree<F>
where
    F: Frame,
{
    routes: IndexMap<StreamId, ChildId>,
    children: IndexMap<ChildId, Arc<dyn Matcher<F>>>,
}

/// Queues and counters, guarded together so that a round observes and
/// pops the same heads.
struct GroupingState<F> {
    queues: IndexMap<ChildId, FrameQueue<F>>,
    stats: MatcherStats,
}

/// The result of running grouping rounds.
struct Rounds<F> {
    units: Vec<F>,
    error: Option<eyre::Report>,
}

impl<F> CompositeMatcher<F>
where
    F: Frame,
{
    pub fn new(policy: Box<dyn MatchPolicy<F>>, limits: QueueLimits) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            policy,
            limits,
            tree: RwLock::new(MatcherTree {
                routes: IndexMap::new(),
                children: IndexMap::new(),
            }),
            state: Mutex::new(GroupingState {
                queues: IndexMap::new(),
                stats: MatcherStats::default(),
            }),
            callback: CallbackSlot::new(),
            unmatched: CallbackSlot::new(),
            this: this.clone(),
        })
    }

    /// Create a composite that starts out with the given children.
    pub fn with_matchers<I>(
        policy: Box<dyn MatchPolicy<F>>,
        limits: QueueLimits,
        matchers: I,
    ) -> Result<Arc<Self>>
    where
        I: IntoIterator<Item = Arc<dyn Matcher<F>>>,
    {
        let composite = Self::new(policy, limits);
        for matcher in matchers {
            composite.register(matcher)?;
        }
        Ok(composite)
    }

    /// A frame-number composite over `matchers` with unbounded queues.
    pub fn frame_number<I>(matchers: I) -> Result<Arc<Self>>
    where
        I: IntoIterator<Item = Arc<dyn Matcher<F>>>,
    {
        Self::with_matchers(Box::new(FrameNumberPolicy), QueueLimits::default(), matchers)
    }

    /// A timestamp composite over `matchers` with unbounded queues.
    pub fn timestamp<I>(matchers: I) -> Result<Arc<Self>>
    where
        I: IntoIterator<Item = Arc<dyn Matcher<F>>>,
    {
        Self::with_matchers(
            Box::new(TimestampPolicy::new()),
            QueueLimits::default(),
            matchers,
        )
    }

    /// Build the root composite described by `config`. Declared streams
    /// get identity matchers up front.
    pub fn from_config(config: &SyncConfig) -> Result<Arc<Self>> {
        config.validate()?;

        let matchers = config.streams.iter().map(|&stream| {
            Arc::new(IdentityMatcher::new(StreamId::unowned(stream))) as Arc<dyn Matcher<F>>
        });
        Self::with_matchers(config.policy.build(), config.limits(), matchers)
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    /// Adds a child and routes every stream it claims to it.
    pub fn register(&self, matcher: Arc<dyn Matcher<F>>) -> Result<ChildId> {
        let mut tree = self.write_tree()?;

        if let Some(stream) = matcher
            .streams()
            .into_iter()
            .find(|stream| tree.routes.contains_key(stream))
        {
            bail!("stream {stream} is already routed to a child matcher");
        }

        self.insert_child(&mut tree, matcher)
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> Result<MatcherStats> {
        let state = self.lock_state()?;
        let mut stats = state.stats.clone();
        stats.queued = state.queues.values().map(|queue| queue.len()).sum();
        Ok(stats)
    }

    /// Drains the whole tree and hands the frames to the unmatched sink.
    /// Returns the number of released frames.
    pub fn release(&self, source: &dyn FrameSource<F>) -> Result<usize> {
        let frames = self.drain()?;
        let count = frames.len();
        self.deliver(frames, vec![], source)?;
        Ok(count)
    }

    fn insert_child(
        &self,
        tree: &mut MatcherTree<F>,
        matcher: Arc<dyn Matcher<F>>,
    ) -> Result<ChildId> {
        let child = ChildId(tree.children.len());

        matcher.set_callback(self.child_callback(child));
        if let Some(unmatched) = self.unmatched.get() {
            matcher.set_unmatched_callback(unmatched);
        }

        for stream in matcher.streams() {
            tree.routes.entry(stream).or_insert(child);
        }

        let capacity = self.limits.max_depth.unwrap_or_default();
        self.lock_state()?
            .queues
            .insert(child, FrameQueue::with_capacity(capacity));
        tree.children.insert(child, matcher);

        debug!(
            policy = self.policy.name(),
            %child,
            streams = %tree
                .routes
                .iter()
                .filter(|&(_, &id)| id == child)
                .map(|(stream, _)| stream)
                .join(","),
            "registered child matcher"
        );

        Ok(child)
    }

    /// The grouping entry point handed to a child. It holds the parent
    /// weakly and tags the output with the child's id.
    fn child_callback(&self, child: ChildId) -> SyncCallback<F> {
        let parent = self.this.clone();
        sync_callback(move |frame, source| match parent.upgrade() {
            Some(parent) => parent.sync(child, frame, source),
            None => {
                debug!(%child, "parent matcher is gone; dropping frame");
                Ok(())
            }
        })
    }

    /// Finds the child for `stream`, creating it on first sight.
    fn resolve(
        &self,
        stream: StreamId,
        device: Option<DeviceRef<F>>,
    ) -> Result<(ChildId, Arc<dyn Matcher<F>>)> {
        {
            let tree = self.read_tree()?;
            if let Some(found) = tree.lookup(&stream) {
                return Ok(found);
            }
        }

        let mut tree = self.write_tree()?;
        // another dispatch may have registered it meanwhile
        if let Some(found) = tree.lookup(&stream) {
            return Ok(found);
        }

        let matcher: Arc<dyn Matcher<F>> = match device {
            Some(device) => device
                .create_matcher(stream.stream)
                .wrap_err_with(|| format!("Failed to create matcher for stream {stream}"))?,
            None => Arc::new(IdentityMatcher::new(stream)),
        };

        let child = self.insert_child(&mut tree, matcher.clone())?;
        tree.routes.entry(stream).or_insert(child);

        Ok((child, matcher))
    }

    /// Stages a frame emitted by `child` and emits every group that can
    /// be formed.
    fn sync(&self, child: ChildId, frame: F, source: &dyn FrameSource<F>) -> Result<()> {
        // Held across delivery so units leave in the order they were
        // assembled.
        let mut state = self.lock_state()?;

        let mut evicted = vec![];
        state.enqueue(child, frame, &self.limits, &mut evicted);

        let rounds = state.run(&*self.policy, &self.limits, source, true);
        let delivered = self.deliver(evicted, rounds.units, source);
        drop(state);

        match rounds.error {
            Some(error) => Err(error),
            None => delivered,
        }
    }

    /// Hands evicted frames to the unmatched sink and units to the
    /// callback. Every frame is delivered even if a sink fails; the first
    /// failure is returned.
    fn deliver(&self, evicted: Vec<F>, units: Vec<F>, source: &dyn FrameSource<F>) -> Result<()> {
        let mut result = Ok(());

        if !evicted.is_empty() {
            match self.unmatched.get() {
                Some(unmatched) => {
                    for frame in evicted {
                        let outcome = unmatched(frame, source);
                        result = result.and(outcome);
                    }
                }
                None => debug!(count = evicted.len(), "dropping unmatched frames"),
            }
        }

        if !units.is_empty() {
            match self.callback.get() {
                Some(callback) => {
                    for unit in units {
                        let outcome = callback(unit, source);
                        result = result.and(outcome);
                    }
                }
                None => debug!(count = units.len(), "no callback registered; dropping units"),
            }
        }

        result
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, GroupingState<F>>> {
        self.state
            .lock()
            .map_err(|_| eyre!("matcher queue lock poisoned"))
    }

    fn read_tree(&self) -> Result<RwLockReadGuard<'_, MatcherTree<F>>> {
        self.tree
            .read()
            .map_err(|_| eyre!("matcher tree lock poisoned"))
    }

    fn write_tree(&self) -> Result<RwLockWriteGuard<'_, MatcherTree<F>>> {
        self.tree
            .write()
            .map_err(|_| eyre!("matcher tree lock poisoned"))
    }

    fn children(&self) -> Result<Vec<Arc<dyn Matcher<F>>>> {
        Ok(self.read_tree()?.children.values().cloned().collect())
    }
}

impl<F> MatcherTree<F>
where
    F: Frame,
{
    fn lookup(&self, stream: &StreamId) -> Option<(ChildId, Arc<dyn Matcher<F>>)> {
        let child = *self.routes.get(stream)?;
        let matcher = self.children.get(&child)?.clone();
        Some((child, matcher))
    }
}

impl<F> GroupingState<F>
where
    F: Frame,
{
    /// Appends a frame to the child's queue, applying the depth limit.
    fn enqueue(&mut self, child: ChildId, frame: F, limits: &QueueLimits, evicted: &mut Vec<F>) {
        let queue = self.queues.entry(child).or_default();

        if let Some(max_depth) = limits.max_depth
            && queue.len() >= max_depth
        {
            match limits.drop_policy {
                DropPolicy::DropOldest => {
                    if let Some(oldest) = queue.pop_front() {
                        evicted.push(oldest.frame);
                    }
                    queue.push_back(frame);
                }
                DropPolicy::RejectNew => evicted.push(frame),
            }

            self.stats.frames_evicted += 1;
            warn!(%child, max_depth, policy = ?limits.drop_policy, "queue full; evicting a frame");
            return;
        }

        queue.push_back(frame);
    }

    /// Runs rounds until no group can be emitted. With `wait` unset,
    /// missing children are never waited for.
    fn run(
        &mut self,
        policy: &dyn MatchPolicy<F>,
        limits: &QueueLimits,
        source: &dyn FrameSource<F>,
        wait: bool,
    ) -> Rounds<F> {
        let mut units = vec![];

        let error = loop {
            let Some(synced) = self.select(policy, limits, wait) else {
                break None;
            };

            match self.assemble(&synced, source) {
                Ok(unit) => {
                    self.stats.groups_emitted += 1;
                    debug!(
                        policy = policy.name(),
                        size = synced.len(),
                        number = unit.frame_number(),
                        timestamp = unit.timestamp(),
                        "group emitted"
                    );
                    units.push(unit);
                }
                Err(error) => break Some(error),
            }
        };

        Rounds { units, error }
    }

    /// Picks the children whose head frames form the next group, or
    /// None if nothing can be emitted yet.
    fn select(
        &mut self,
        policy: &dyn MatchPolicy<F>,
        limits: &QueueLimits,
        wait: bool,
    ) -> Option<Vec<ChildId>> {
        let mut heads: Vec<(ChildId, &F)> = vec![];
        let mut missing: Vec<ChildId> = vec![];

        for (&child, queue) in &self.queues {
            match queue.front() {
                Some(frame) => heads.push((child, frame)),
                None => missing.push(child),
            }
        }

        let (&(first_child, first_frame), rest) = heads.split_first()?;

        trace!(
            heads = %heads
                .iter()
                .map(|(child, frame)| format!(
                    "{child}:{}#{}@{:.3}",
                    frame.stream_type(),
                    frame.frame_number(),
                    frame.timestamp()
                ))
                .join(" "),
            "queue heads"
        );

        let mut synced_frame = first_frame;
        let mut synced = vec![first_child];

        for &(child, frame) in rest {
            if policy.are_equivalent(synced_frame, frame) {
                synced.push(child);
            } else if policy.is_smaller_than(frame, synced_frame) {
                synced.clear();
                synced.push(child);
                synced_frame = frame;
            }
        }

        trace!(candidate = %synced.iter().join(","), "candidate formed");

        if wait
            && let Some(&pending) = missing
                .iter()
                .find(|&&child| policy.wait_for_stream(synced_frame, child))
        {
            let waited_too_long = limits
                .wait_timeout
                .zip(self.queues.get(&synced[0]).and_then(FrameQueue::front_enqueued_at))
                .is_some_and(|(timeout, staged_at)| staged_at.elapsed() >= timeout);

            if !waited_too_long {
                debug!(
                    policy = policy.name(),
                    candidate = %synced.iter().join(","),
                    %pending,
                    "round abandoned; waiting for stream"
                );
                self.stats.rounds_abandoned += 1;
                return None;
            }

            warn!(
                candidate = %synced.iter().join(","),
                %pending,
                "wait timeout elapsed; emitting without stream"
            );
        }

        Some(synced)
    }

    /// Pops one frame per selected child and builds the composite. On
    /// allocation failure the frames go back to the heads of their
    /// queues.
    fn assemble(&mut self, synced: &[ChildId], source: &dyn FrameSource<F>) -> Result<F> {
        let mut frames = Vec::with_capacity(synced.len());
        let mut staged_at: Vec<(ChildId, Instant)> = Vec::with_capacity(synced.len());

        for &child in synced {
            let Some(Staged { frame, enqueued_at }) = self
                .queues
                .get_mut(&child)
                .and_then(FrameQueue::pop_front)
            else {
                self.restore(staged_at, frames);
                bail!("queue of child {child} emptied during a grouping round");
            };
            frames.push(frame);
            staged_at.push((child, enqueued_at));
        }

        match source.allocate_composite(frames) {
            Ok(unit) => Ok(unit),
            Err(CompositeAllocError { frames, error }) => {
                let returned = frames.len();
                self.restore(staged_at, frames);
                Err(error.wrap_err(format!(
                    "Failed to allocate a composite of {} frames ({returned} restored)",
                    synced.len()
                )))
            }
        }
    }

    fn restore(&mut self, staged_at: Vec<(ChildId, Instant)>, frames: Vec<F>) {
        for ((child, enqueued_at), frame) in staged_at.into_iter().zip(frames) {
            if let Some(queue) = self.queues.get_mut(&child) {
                queue.restore_front(Staged { frame, enqueued_at });
            }
        }
    }

    fn drain(&mut self) -> Vec<F> {
        self.queues
            .values_mut()
            .flat_map(|queue| queue.drain().collect::<Vec<_>>())
            .collect()
    }
}

impl<F> Matcher<F> for CompositeMatcher<F>
where
    F: Frame,
{
    fn dispatch(&self, frame: F, source: &dyn FrameSource<F>) -> Result<()> {
        self.policy.admit(&frame)?;

        let device = frame.device();
        let stream = StreamId::new(device.as_ref().map(|device| device.id()), frame.stream_type());
        let (child, matcher) = self.resolve(stream, device)?;

        // The prediction must be current before the frame can trigger a
        // round, including the rounds that dequeue it right away.
        self.policy.on_dispatched(child, FrameSample::of(&frame));
        matcher.dispatch(frame, source)
    }

    fn streams(&self) -> Vec<StreamId> {
        self.tree
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .routes
            .keys()
            .copied()
            .collect()
    }

    fn set_callback(&self, callback: SyncCallback<F>) {
        self.callback.set(callback);
    }

    fn set_unmatched_callback(&self, callback: SyncCallback<F>) {
        let tree = self.tree.read().unwrap_or_else(PoisonError::into_inner);
        for child in tree.children.values() {
            child.set_unmatched_callback(callback.clone());
        }
        self.unmatched.set(callback);
    }

    fn flush(&self, source: &dyn FrameSource<F>) -> Result<()> {
        for child in self.children()? {
            child.flush(source)?;
        }

        let mut state = self.lock_state()?;
        let rounds = state.run(&*self.policy, &self.limits, source, false);
        let delivered = self.deliver(vec![], rounds.units, source);
        drop(state);

        match rounds.error {
            Some(error) => Err(error),
            None => delivered,
        }
    }

    fn drain(&self) -> Result<Vec<F>> {
        let mut frames = vec![];
        for child in self.children()? {
            frames.extend(child.drain()?);
        }
        frames.extend(self.lock_state()?.drain());
        Ok(frames)
    }
}

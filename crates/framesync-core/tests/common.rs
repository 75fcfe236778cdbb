use eyre::{Result, eyre};
use framesync_core::{
    CompositeAllocError, CompositeMatcher, Device, DeviceId, DeviceRef, Frame, FrameSource,
    IdentityMatcher, Matcher, StreamId, StreamType, SyncConfig, Syncer, sync,
};
use futures::{
    Stream,
    stream::{self, TryStreamExt},
};
use std::{
    fmt,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

pub struct TestFrame {
    pub stream: StreamType,
    pub number: u64,
    pub timestamp: f64,
    pub fps: f64,
    pub device: Option<DeviceRef<TestFrame>>,
    pub members: Vec<TestFrame>,
}

impl TestFrame {
    pub fn new(stream: StreamType, number: u64, timestamp: f64, fps: f64) -> Self {
        Self {
            stream,
            number,
            timestamp,
            fps,
            device: None,
            members: vec![],
        }
    }

    #[allow(dead_code)]
    pub fn on(mut self, device: &DeviceRef<TestFrame>) -> Self {
        self.device = Some(device.clone());
        self
    }

    /// `(stream, number)` of every member, or of the frame itself.
    pub fn labels(&self) -> Vec<(StreamType, u64)> {
        if self.members.is_empty() {
            vec![(self.stream, self.number)]
        } else {
            self.members.iter().flat_map(TestFrame::labels).collect()
        }
    }

    #[allow(dead_code)]
    pub fn member_timestamps(&self) -> Vec<f64> {
        if self.members.is_empty() {
            vec![self.timestamp]
        } else {
            self.members
                .iter()
                .flat_map(TestFrame::member_timestamps)
                .collect()
        }
    }
}

impl fmt::Debug for TestFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestFrame")
            .field("stream", &self.stream)
            .field("number", &self.number)
            .field("timestamp", &self.timestamp)
            .field("members", &self.members)
            .finish()
    }
}

impl Frame for TestFrame {
    fn stream_type(&self) -> StreamType {
        self.stream
    }

    fn frame_number(&self) -> u64 {
        self.number
    }

    fn timestamp(&self) -> f64 {
        self.timestamp
    }

    fn frame_rate(&self) -> f64 {
        self.fps
    }

    fn device(&self) -> Option<DeviceRef<Self>> {
        self.device.clone()
    }
}

/// A frame at `fps` whose timestamp follows from its frame number.
#[allow(dead_code)]
pub fn frame(stream: StreamType, number: u64, fps: f64) -> TestFrame {
    TestFrame::new(stream, number, number as f64 * 1000.0 / fps, fps)
}

/// Builds composites carrying the first member's metadata.
pub struct TestSource;

impl FrameSource<TestFrame> for TestSource {
    fn allocate_composite(
        &self,
        frames: Vec<TestFrame>,
    ) -> Result<TestFrame, CompositeAllocError<TestFrame>> {
        let Some(first) = frames.first() else {
            return Err(CompositeAllocError::new(frames, eyre!("empty composite")));
        };

        Ok(TestFrame {
            stream: first.stream,
            number: first.number,
            timestamp: first.timestamp,
            fps: first.fps,
            device: first.device.clone(),
            members: frames,
        })
    }
}

/// Fails the allocations whose zero-based call index is listed, and
/// otherwise behaves like [TestSource].
#[allow(dead_code)]
pub struct FlakySource {
    calls: AtomicUsize,
    failing: Vec<usize>,
}

#[allow(dead_code)]
impl FlakySource {
    /// Fails the first `failures` allocations.
    pub fn new(failures: usize) -> Self {
        Self::failing((0..failures).collect())
    }

    pub fn failing(calls: Vec<usize>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            failing: calls,
        }
    }
}

impl FrameSource<TestFrame> for FlakySource {
    fn allocate_composite(
        &self,
        frames: Vec<TestFrame>,
    ) -> Result<TestFrame, CompositeAllocError<TestFrame>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(&call) {
            return Err(CompositeAllocError::new(frames, eyre!("out of frame memory")));
        }
        TestSource.allocate_composite(frames)
    }
}

/// A device whose depth and infrared streams share a frame-number
/// composite. Other streams get identity matchers.
#[allow(dead_code)]
pub struct StereoDevice {
    id: DeviceId,
}

#[allow(dead_code)]
impl StereoDevice {
    pub fn new(id: u64) -> DeviceRef<TestFrame> {
        Arc::new(Self { id: DeviceId(id) })
    }
}

impl Device<TestFrame> for StereoDevice {
    fn id(&self) -> DeviceId {
        self.id
    }

    fn create_matcher(&self, stream: StreamType) -> Result<Arc<dyn Matcher<TestFrame>>> {
        let id = |stream| StreamId::new(Some(self.id), stream);

        let matcher: Arc<dyn Matcher<TestFrame>> = match stream {
            StreamType::Depth | StreamType::Infrared => {
                let children: Vec<Arc<dyn Matcher<TestFrame>>> = vec![
                    Arc::new(IdentityMatcher::new(id(StreamType::Depth))),
                    Arc::new(IdentityMatcher::new(id(StreamType::Infrared))),
                ];
                CompositeMatcher::frame_number(children)?
            }
            StreamType::Gpio => {
                return Err(eyre!("stream {stream} cannot be synchronized"));
            }
            other => Arc::new(IdentityMatcher::new(id(other))),
        };
        Ok(matcher)
    }
}

pub type Emitted = Arc<Mutex<Vec<TestFrame>>>;

/// Creates a synchronizer recording emitted units and unmatched frames.
#[allow(dead_code)]
pub fn recording_syncer(
    config: SyncConfig,
    source: Arc<dyn FrameSource<TestFrame>>,
) -> Result<(Syncer<TestFrame>, Emitted, Emitted)> {
    let syncer = Syncer::new(config, source)?;

    let emitted: Emitted = Arc::new(Mutex::new(vec![]));
    let unmatched: Emitted = Arc::new(Mutex::new(vec![]));

    let sink = emitted.clone();
    syncer.set_callback(move |unit, _source| {
        sink.lock().unwrap().push(unit);
        Ok(())
    });
    let sink = unmatched.clone();
    syncer.set_unmatched_callback(move |frame, _source| {
        sink.lock().unwrap().push(frame);
        Ok(())
    });

    Ok((syncer, emitted, unmatched))
}

/// Labels of every unit recorded so far.
#[allow(dead_code)]
pub fn labels(emitted: &Emitted) -> Vec<Vec<(StreamType, u64)>> {
    emitted.lock().unwrap().iter().map(TestFrame::labels).collect()
}

/// Helper function to run the stream adaptor and collect all units
#[allow(dead_code)]
pub async fn run_sync(
    input: impl Stream<Item = Result<TestFrame>> + Unpin + Send,
    config: SyncConfig,
) -> Result<Vec<TestFrame>> {
    let output = sync(input, config, Arc::new(TestSource))?;
    let units: Vec<TestFrame> = output.try_collect().await?;
    Ok(units)
}

#[allow(dead_code)]
pub fn frame_stream(frames: Vec<TestFrame>) -> impl Stream<Item = Result<TestFrame>> + Unpin + Send {
    stream::iter(frames.into_iter().map(Ok))
}

/// Assert that every unit holds frames the timestamp policy deems equivalent
#[allow(dead_code)]
pub fn assert_units_within_tolerance(units: &[TestFrame]) {
    for unit in units {
        let timestamps = unit.member_timestamps();
        let min_fps = unit
            .members
            .iter()
            .map(|member| member.fps)
            .fold(unit.fps, f64::min);
        let tolerance = 1000.0 / min_fps / 2.0;

        for a in &timestamps {
            for b in &timestamps {
                assert!(
                    (a - b).abs() < tolerance,
                    "Frames in unit exceed tolerance: {a} vs {b}, tolerance={tolerance}"
                );
            }
        }
    }
}

/// Assert that the frames of each stream leave in dispatch order
#[allow(dead_code)]
pub fn assert_fifo_per_stream(units: &[TestFrame]) {
    let mut last: std::collections::HashMap<StreamType, u64> = Default::default();

    for unit in units {
        for (stream, number) in unit.labels() {
            if let Some(&prev) = last.get(&stream) {
                assert!(
                    number > prev,
                    "Stream {stream} out of order: {prev} before {number}"
                );
            }
            last.insert(stream, number);
        }
    }
}

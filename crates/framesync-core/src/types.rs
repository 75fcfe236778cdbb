use crate::matcher::Matcher;
use eyre::Result;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};

/// The sensing modality a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamType {
    Any,
    Depth,
    Color,
    Infrared,
    Fisheye,
    Gyro,
    Accel,
    Gpio,
    Pose,
    Confidence,
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamType::Any => "any",
            StreamType::Depth => "depth",
            StreamType::Color => "color",
            StreamType::Infrared => "infrared",
            StreamType::Fisheye => "fisheye",
            StreamType::Gyro => "gyro",
            StreamType::Accel => "accel",
            StreamType::Gpio => "gpio",
            StreamType::Pose => "pose",
            StreamType::Confidence => "confidence",
        };
        f.write_str(name)
    }
}

/// Identifies the device that owns a sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub u64);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev{}", self.0)
    }
}

/// The key that routes a frame to its matcher in the matcher tree.
///
/// Frames whose owner is unknown share one key per stream type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId {
    pub device: Option<DeviceId>,
    pub stream: StreamType,
}

impl StreamId {
    pub fn new(device: Option<DeviceId>, stream: StreamType) -> Self {
        Self { device, stream }
    }

    /// A stream whose owning device is unknown.
    pub fn unowned(stream: StreamType) -> Self {
        Self {
            device: None,
            stream,
        }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.device {
            Some(device) => write!(f, "{}/{}", device, self.stream),
            None => write!(f, "?/{}", self.stream),
        }
    }
}

/// Read-only accessors of a frame handed to the synchronizer.
///
/// Frames are moved through the engine and never cloned. Timestamps are
/// in milliseconds and frame rates in frames per second.
pub trait Frame: Send + Sized + 'static {
    fn stream_type(&self) -> StreamType;

    fn frame_number(&self) -> u64;

    fn timestamp(&self) -> f64;

    fn frame_rate(&self) -> f64;

    /// The device owning the sensor that produced this frame, if known.
    fn device(&self) -> Option<DeviceRef<Self>> {
        None
    }

    /// Derives the key used to look up the frame's matcher.
    fn stream_id(&self) -> StreamId {
        StreamId::new(self.device().map(|device| device.id()), self.stream_type())
    }
}

/// A device that knows how its streams should be synchronized.
pub trait Device<F>: Send + Sync
where
    F: Frame,
{
    fn id(&self) -> DeviceId;

    /// Builds the matcher responsible for `stream` on this device.
    fn create_matcher(&self, stream: StreamType) -> Result<Arc<dyn Matcher<F>>>;
}

pub type DeviceRef<F> = Arc<dyn Device<F>>;

/// The context frames are dispatched from. It owns frame allocation and
/// turns a list of matched frames into one composite frame.
pub trait FrameSource<F>: Send + Sync
where
    F: Frame,
{
    fn allocate_composite(&self, frames: Vec<F>) -> Result<F, CompositeAllocError<F>>;
}

/// Returned by [FrameSource::allocate_composite] when a composite cannot
/// be built. The member frames are handed back untouched.
pub struct CompositeAllocError<F> {
    pub frames: Vec<F>,
    pub error: eyre::Report,
}

impl<F> CompositeAllocError<F> {
    pub fn new(frames: Vec<F>, error: eyre::Report) -> Self {
        Self { frames, error }
    }
}

impl<F> fmt::Debug for CompositeAllocError<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeAllocError")
            .field("frames", &self.frames.len())
            .field("error", &self.error)
            .finish()
    }
}

/// The sink a matcher delivers its output to.
pub type SyncCallback<F> = Arc<dyn Fn(F, &dyn FrameSource<F>) -> Result<()> + Send + Sync>;

/// Wraps a closure into a [SyncCallback].
pub fn sync_callback<F, C>(callback: C) -> SyncCallback<F>
where
    F: Frame,
    C: Fn(F, &dyn FrameSource<F>) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(callback)
}

/// The stream returned by [sync](crate::sync()), emitting synchronized
/// units.
pub type OutputStream<'a, F> = BoxStream<'a, Result<F>>;

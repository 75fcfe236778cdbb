//! Frame and source doubles for unit tests.

use crate::types::{CompositeAllocError, DeviceRef, Frame, FrameSource, StreamType};
use std::fmt;

pub struct ProbeFrame {
    pub stream: StreamType,
    pub number: u64,
    pub timestamp: f64,
    pub fps: f64,
    pub device: Option<DeviceRef<ProbeFrame>>,
    pub members: Vec<ProbeFrame>,
}

impl ProbeFrame {
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

    pub fn owned_by(mut self, device: DeviceRef<ProbeFrame>) -> Self {
        self.device = Some(device);
        self
    }

    /// `(stream, number)` of every member, or of the frame itself.
    pub fn labels(&self) -> Vec<(StreamType, u64)> {
        if self.members.is_empty() {
            vec![(self.stream, self.number)]
        } else {
            self.members.iter().flat_map(|member| member.labels()).collect()
        }
    }
}

impl fmt::Debug for ProbeFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbeFrame")
            .field("stream", &self.stream)
            .field("number", &self.number)
            .field("timestamp", &self.timestamp)
            .field("members", &self.members)
            .finish()
    }
}

impl Frame for ProbeFrame {
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

/// Bundles matched frames into a composite carrying the first member's
/// metadata.
pub struct VecSource;

impl FrameSource<ProbeFrame> for VecSource {
    fn allocate_composite(
        &self,
        frames: Vec<ProbeFrame>,
    ) -> Result<ProbeFrame, CompositeAllocError<ProbeFrame>> {
        let Some(first) = frames.first() else {
            return Err(CompositeAllocError::new(
                frames,
                eyre::eyre!("empty composite"),
            ));
        };

        Ok(ProbeFrame {
            stream: first.stream,
            number: first.number,
            timestamp: first.timestamp,
            fps: first.fps,
            device: first.device.clone(),
            members: frames,
        })
    }
}

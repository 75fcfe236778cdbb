use framesync_core::{
    CompositeAllocError, Frame, FrameSource, PolicyKind, StreamType, SyncConfig, sync,
};
use futures::{stream, stream::TryStreamExt};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

// Define your frame type
#[derive(Debug)]
struct MyFrame {
    stream: StreamType,
    number: u64,
    timestamp: f64,
    fps: f64,
    members: Vec<MyFrame>,
}

impl Frame for MyFrame {
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
}

// Composites keep their members and the first member's timing
struct MySource;

impl FrameSource<MyFrame> for MySource {
    fn allocate_composite(
        &self,
        members: Vec<MyFrame>,
    ) -> Result<MyFrame, CompositeAllocError<MyFrame>> {
        let Some(first) = members.first() else {
            return Err(CompositeAllocError::new(
                members,
                eyre::eyre!("empty composite"),
            ));
        };

        Ok(MyFrame {
            stream: StreamType::Any,
            number: first.number,
            timestamp: first.timestamp,
            fps: first.fps,
            members,
        })
    }
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Depth at 30 fps, color at 15 fps with a small offset
    let depth = (0..6).map(|number| (StreamType::Depth, number, number as f64 * 33.3, 30.0));
    let color = (0..3).map(|number| (StreamType::Color, number, number as f64 * 66.7 + 2.0, 15.0));

    let mut frames: Vec<MyFrame> = depth
        .chain(color)
        .map(|(stream, number, timestamp, fps)| MyFrame {
            stream,
            number,
            timestamp,
            fps,
            members: vec![],
        })
        .collect();
    frames.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));

    // Run the synchronization algorithm
    let config = SyncConfig::offline(PolicyKind::Timestamp)
        .with_streams([StreamType::Depth, StreamType::Color]);
    let input = stream::iter(frames.into_iter().map(eyre::Ok));
    let output = sync(input, config, Arc::new(MySource))?;

    // Collect the units
    let units: Vec<MyFrame> = output.try_collect().await?;
    for unit in &units {
        let members: Vec<String> = unit
            .members
            .iter()
            .map(|frame| format!("{}#{}@{:.1}", frame.stream, frame.number, frame.timestamp))
            .collect();
        println!("{}", members.join(" + "));
    }

    Ok(())
}

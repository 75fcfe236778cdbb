//! This library groups frames of multiple sensor streams into
//! synchronized composite units.
//!
//! Frames are dispatched into a tree of matchers. Leaves forward frames
//! of one stream; composite matchers stage the output of their children
//! and emit a unit once every stream has a matching frame, or once the
//! missing streams are judged not worth waiting for. Frames are matched
//! either by frame number or by timestamp.
//!
//! # Usage
//!
//! ```rust
//! use framesync_core::{
//!     CompositeAllocError, Frame, FrameSource, StreamType, SyncConfig, sync,
//! };
//! use futures::{stream, stream::TryStreamExt};
//! use std::sync::Arc;
//!
//! // Define your frame type. A composite keeps its members.
//! struct MyFrame {
//!     stream: StreamType,
//!     number: u64,
//!     members: Vec<MyFrame>,
//! }
//!
//! impl Frame for MyFrame {
//!     fn stream_type(&self) -> StreamType {
//!         self.stream
//!     }
//!
//!     fn frame_number(&self) -> u64 {
//!         self.number
//!     }
//!
//!     fn timestamp(&self) -> f64 {
//!         self.number as f64 * 1000.0 / 30.0
//!     }
//!
//!     fn frame_rate(&self) -> f64 {
//!         30.0
//!     }
//! }
//!
//! // The frame source builds composite frames out of matched frames.
//! struct MySource;
//!
//! impl FrameSource<MyFrame> for MySource {
//!     fn allocate_composite(
//!         &self,
//!         members: Vec<MyFrame>,
//!     ) -> Result<MyFrame, CompositeAllocError<MyFrame>> {
//!         let number = members.first().map(|frame| frame.number).unwrap_or_default();
//!         Ok(MyFrame {
//!             stream: StreamType::Any,
//!             number,
//!             members,
//!         })
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> eyre::Result<()> {
//! let frame = |stream, number| {
//!     eyre::Ok(MyFrame {
//!         stream,
//!         number,
//!         members: vec![],
//!     })
//! };
//! let input = stream::iter([
//!     frame(StreamType::Depth, 1),
//!     frame(StreamType::Color, 1),
//!     frame(StreamType::Depth, 2),
//!     frame(StreamType::Color, 2),
//! ]);
//!
//! // Pair depth and color frames by frame number.
//! let config = SyncConfig::frame_number().with_streams([StreamType::Depth, StreamType::Color]);
//! let units: Vec<MyFrame> = sync(input, config, Arc::new(MySource))?
//!     .try_collect()
//!     .await?;
//!
//! assert_eq!(units.len(), 2);
//! assert!(units.iter().all(|unit| unit.members.len() == 2));
//! # Ok(())
//! # }
//! ```

mod config;
pub mod matcher;
pub mod policy;
pub mod queue;
mod sync;
mod syncer;
#[cfg(test)]
mod testing;
mod types;

pub use config::{DropPolicy, PolicyKind, QueueLimits, ShutdownPolicy, SyncConfig};
pub use matcher::{ChildId, CompositeMatcher, IdentityMatcher, Matcher, MatcherStats};
pub use policy::{FrameNumberPolicy, FrameSample, MatchPolicy, TimestampPolicy};
pub use sync::sync;
pub use syncer::Syncer;
pub use types::*;

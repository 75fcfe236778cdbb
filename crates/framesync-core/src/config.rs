use crate::types::StreamType;
use eyre::{Result, WrapErr, ensure};
use serde::Deserialize;
use std::{fs, path::Path, time::Duration};

/// The equivalence policy used by a composite matcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// Frames match when their frame numbers are equal.
    #[default]
    FrameNumber,

    /// Frames match when their timestamps lie within half of the slower
    /// stream's frame interval.
    Timestamp,
}

/// Policy for handling queue overflow when a frame is staged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropPolicy {
    /// Turn the incoming frame away when the queue is full.
    /// Preserves the frames already waiting.
    #[default]
    RejectNew,

    /// Evict the oldest staged frame to make room for the new one.
    /// Always accepts new data. Suitable for live sensors.
    DropOldest,
}

/// What happens to staged frames when the synchronizer shuts down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownPolicy {
    /// Hand every staged frame to the unmatched sink, or drop it.
    #[default]
    Release,

    /// Emit staged frames as final groups without waiting for missing
    /// streams.
    Flush,
}

/// Bounds applied to the queues of one composite matcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueLimits {
    pub max_depth: Option<usize>,
    pub drop_policy: DropPolicy,
    pub wait_timeout: Option<Duration>,
}

/// Configuration parameters passed to [Syncer](crate::Syncer).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Policy of the root composite matcher.
    pub policy: PolicyKind,

    /// Streams of unknown owner that are expected before their first
    /// frame arrives.
    pub streams: Vec<StreamType>,

    /// The maximum number of frames staged for each child matcher.
    /// None means unbounded.
    pub max_queue_depth: Option<usize>,

    /// Policy for handling queue overflow.
    pub drop_policy: DropPolicy,

    /// How long a staged frame may hold back its group while a missing
    /// stream is waited for. None means wait indefinitely.
    #[serde(with = "humantime_serde")]
    pub wait_timeout: Option<Duration>,

    /// Policy for frames still staged at shutdown.
    pub shutdown: ShutdownPolicy,
}

impl SyncConfig {
    /// Create a config matching frames by frame number.
    pub fn frame_number() -> Self {
        Self {
            policy: PolicyKind::FrameNumber,
            ..Self::default()
        }
    }

    /// Create a config matching frames by timestamp.
    pub fn timestamp() -> Self {
        Self {
            policy: PolicyKind::Timestamp,
            ..Self::default()
        }
    }

    /// Create config for live capture.
    /// Bounded queues that evict the oldest frame and a finite wait.
    pub fn realtime(policy: PolicyKind, max_queue_depth: usize, wait_timeout: Duration) -> Self {
        Self {
            policy,
            streams: vec![],
            max_queue_depth: Some(max_queue_depth),
            drop_policy: DropPolicy::DropOldest,
            wait_timeout: Some(wait_timeout),
            shutdown: ShutdownPolicy::Release,
        }
    }

    /// Create config for recorded playback.
    /// Unbounded queues and leftovers flushed at the end.
    pub fn offline(policy: PolicyKind) -> Self {
        Self {
            policy,
            shutdown: ShutdownPolicy::Flush,
            ..Self::default()
        }
    }

    /// Declare unknown-owner streams up front.
    pub fn with_streams(mut self, streams: impl IntoIterator<Item = StreamType>) -> Self {
        self.streams = streams.into_iter().collect();
        self
    }

    /// Set the maximum queue depth.
    pub fn with_max_queue_depth(mut self, max_queue_depth: usize) -> Self {
        self.max_queue_depth = Some(max_queue_depth);
        self
    }

    /// Set the drop policy
    pub fn with_drop_policy(mut self, drop_policy: DropPolicy) -> Self {
        self.drop_policy = drop_policy;
        self
    }

    /// Set the wait timeout
    pub fn with_wait_timeout(mut self, wait_timeout: Duration) -> Self {
        self.wait_timeout = Some(wait_timeout);
        self
    }

    /// Set the shutdown policy
    pub fn with_shutdown(mut self, shutdown: ShutdownPolicy) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// The queue bounds derived from this config.
    pub fn limits(&self) -> QueueLimits {
        QueueLimits {
            max_depth: self.max_queue_depth,
            drop_policy: self.drop_policy,
            wait_timeout: self.wait_timeout,
        }
    }

    /// Load configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_yaml_str(&contents)
            .wrap_err_with(|| format!("Failed to load config file: {}", path.display()))
    }

    /// Parse and validate configuration from YAML text.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let config: SyncConfig =
            serde_yaml::from_str(text).wrap_err("Failed to parse sync config")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if let Some(depth) = self.max_queue_depth {
            ensure!(depth > 0, "max_queue_depth must be greater than zero");
        }

        if let Some(timeout) = self.wait_timeout {
            ensure!(!timeout.is_zero(), "wait_timeout must be greater than zero");
        }

        let mut streams = self.streams.clone();
        streams.sort();
        for window in streams.windows(2) {
            ensure!(window[0] != window[1], "Duplicate stream: {}", window[0]);
        }

        Ok(())
    }
}

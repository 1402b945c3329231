//! Functions for loading loader settings.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::*;

/// A structure containing configuration data for one `Loader` instance. Every field
/// has its own default, so a JSON document only needs to name what it overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderSettings {
    /// Number of threads reading the disk cache and local sources.
    pub disk_load_max_thread: usize,
    /// Number of threads fetching from the network.
    pub network_load_max_thread: usize,
    /// Connect timeout handed to the network handler, in milliseconds.
    pub network_connect_timeout_ms: u64,
    /// Read timeout handed to the network handler, in milliseconds.
    pub network_read_timeout_ms: u64,
    /// How many times a failed load is automatically reloaded.
    pub reload_times: u32,
    /// Maximum number of decoded resources kept in the default memory cache.
    pub memory_cache_capacity: usize,
    /// Maximum size of the disk cache in bytes.
    pub disk_cache_size: u64,
    /// Root directory of the disk cache. Uses the system temporary directory if
    /// absent.
    pub disk_cache_path: Option<PathBuf>,
    /// Sub directory of `disk_cache_path` the cache lives in.
    pub disk_cache_sub_path: String,
    /// Clears the disk cache every time it is opened.
    pub wipe_disk_cache: bool,
    /// Urls longer than this are rejected.
    pub url_length_limit: usize,
    /// Fetched payloads larger than this are rejected.
    pub data_length_limit: u64,
    /// Maximum size of the in-memory fallback buffer used when the disk cache can
    /// not take a stream.
    pub memory_buffer_length_limit: u64,
    /// Network speed profile used for ordinary fetches.
    pub network_profile: LowNetworkSpeedStrategy,
    /// Root directory of `SourceType::Assets` urls.
    pub assets_dir: Option<PathBuf>,
    /// Root directory of `SourceType::Resource` urls.
    pub resources_dir: Option<PathBuf>,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        LoaderSettings {
            disk_load_max_thread: 2,
            network_load_max_thread: 4,
            network_connect_timeout_ms: 3000,
            network_read_timeout_ms: 5000,
            reload_times: 1,
            memory_cache_capacity: 64,
            disk_cache_size: 100 * 1024 * 1024,
            disk_cache_path: None,
            disk_cache_sub_path: "courier-cache".to_owned(),
            wipe_disk_cache: false,
            url_length_limit: 8 * 1024,
            data_length_limit: u64::max_value(),
            memory_buffer_length_limit: 10 * 1024 * 1024,
            network_profile: LowNetworkSpeedStrategy::Wifi,
            assets_dir: None,
            resources_dir: None,
        }
    }
}

impl LoaderSettings {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = ::std::fs::read(path.as_ref())?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// The directory the disk cache is stored in.
    pub fn disk_cache_dir(&self) -> PathBuf {
        let root = match self.disk_cache_path {
            Some(ref v) => v.clone(),
            None => ::std::env::temp_dir(),
        };

        root.join(&self.disk_cache_sub_path)
    }

    #[inline]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.network_connect_timeout_ms)
    }

    #[inline]
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.network_read_timeout_ms)
    }
}

/// Per-scope settings of a `Node`. Fields left as `None` fall back to the
/// `LoaderSettings` of the owning loader.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSettings {
    /// Maximum number of entries waiting in the disk dispatcher.
    pub disk_queue_size: usize,
    /// Maximum number of entries waiting in the network dispatcher.
    pub network_queue_size: usize,
    /// Maximum number of disk loads running at once.
    pub max_disk_concurrency: Option<usize>,
    /// Maximum number of network loads running at once.
    pub max_network_concurrency: Option<usize>,
    pub reload_times: Option<u32>,
    pub network_connect_timeout_ms: Option<u64>,
    pub network_read_timeout_ms: Option<u64>,
    /// Which end of the waiting queue runs next.
    pub queue_order: QueueOrder,
    /// What happens when two loads share the same cache key.
    pub key_conflict_policy: KeyConflictPolicy,
}

impl Default for NodeSettings {
    fn default() -> Self {
        NodeSettings {
            disk_queue_size: 10,
            network_queue_size: 10,
            max_disk_concurrency: None,
            max_network_concurrency: None,
            reload_times: None,
            network_connect_timeout_ms: None,
            network_read_timeout_ms: None,
            queue_order: QueueOrder::Lifo,
            key_conflict_policy: KeyConflictPolicy::Follow,
        }
    }
}

impl NodeSettings {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = ::std::fs::read(path.as_ref())?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Which end of a waiting queue is started next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueOrder {
    /// Oldest entry first. Trimming drops the newest entry.
    Fifo,
    /// Newest entry first. Trimming drops the oldest entry.
    Lifo,
}

impl Default for QueueOrder {
    fn default() -> Self {
        QueueOrder::Fifo
    }
}

/// What a dispatcher does when a submission's key matches a waiting or running
/// entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyConflictPolicy {
    /// Cancels the old entry and admits the new one in its place.
    Displace,
    /// Attaches the new entry to the old one, it receives the same result.
    Follow,
    /// Cancels the new entry, the old one continues unaffected.
    Cancel,
}

impl Default for KeyConflictPolicy {
    fn default() -> Self {
        KeyConflictPolicy::Displace
    }
}

/// Profiles deciding when a running stream is considered too slow to be worth
/// finishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LowNetworkSpeedStrategy {
    LowSpeed,
    HighSpeed,
    Wifi,
    /// Used for groups with an indispensable member.
    Indispensable,
}

impl Default for LowNetworkSpeedStrategy {
    fn default() -> Self {
        LowNetworkSpeedStrategy::Wifi
    }
}

/// The thresholds of a `LowNetworkSpeedStrategy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeedThreshold {
    /// Speed is not judged before this much time elapsed.
    pub window_period: Duration,
    /// Streams running longer than this are canceled regardless of speed.
    pub deadline: Duration,
    /// Minimum average speed in bytes per second.
    pub threshold_speed: u64,
}

impl LowNetworkSpeedStrategy {
    pub fn threshold(self) -> SpeedThreshold {
        let (window, deadline, speed) = match self {
            LowNetworkSpeedStrategy::LowSpeed => (20, 60, 5 * 1024),
            LowNetworkSpeedStrategy::HighSpeed => (10, 30, 20 * 1024),
            LowNetworkSpeedStrategy::Wifi => (10, 30, 20 * 1024),
            LowNetworkSpeedStrategy::Indispensable => (40, 120, 256),
        };

        SpeedThreshold {
            window_period: Duration::from_secs(window),
            deadline: Duration::from_secs(deadline),
            threshold_speed: speed,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn partial_json() {
        let v = LoaderSettings::from_json(r#"{ "network_load_max_thread": 8, "reload_times": 3 }"#)
            .unwrap();

        assert_eq!(v.network_load_max_thread, 8);
        assert_eq!(v.reload_times, 3);
        assert_eq!(v.disk_load_max_thread, 2);
        assert_eq!(v.network_connect_timeout_ms, 3000);

        let v = NodeSettings::from_json(r#"{ "queue_order": "Fifo", "disk_queue_size": 3 }"#)
            .unwrap();

        assert_eq!(v.queue_order, QueueOrder::Fifo);
        assert_eq!(v.disk_queue_size, 3);
        assert_eq!(v.network_queue_size, 10);
        assert_eq!(v.key_conflict_policy, KeyConflictPolicy::Follow);
    }

    #[test]
    fn malformed_json() {
        assert!(LoaderSettings::from_json("{ reload_times: }").is_err());
    }

    #[test]
    fn thresholds() {
        let v = LowNetworkSpeedStrategy::Indispensable.threshold();
        assert_eq!(v.window_period, Duration::from_secs(40));
        assert_eq!(v.deadline, Duration::from_secs(120));
        assert_eq!(v.threshold_speed, 256);
    }
}

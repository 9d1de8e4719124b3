//! Runtime settings for the relay server

use crate::delivery::SelectionPolicy;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the UDP socket binds to
    pub bind_addr: String,
    /// Maximum number of simultaneously bound recipients
    pub max_recipients: usize,
    pub selection_policy: SelectionPolicy,
    /// Silence after which a recipient is detached
    pub client_timeout: Duration,
    /// Time a detached recipient may stay away before its record and queue
    /// are retired; `None` keeps detached records indefinitely
    pub archive_after: Option<Duration>,
    /// Wire-level retransmission of in-flight events; `None` disables it
    pub resend_interval: Option<Duration>,
    /// Period of the demo heartbeat broadcast; `None` disables it
    pub broadcast_interval: Option<Duration>,
    /// Payload sent to each recipient right after it connects
    pub welcome_payload: Option<Vec<u8>>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            max_recipients: 32,
            selection_policy: SelectionPolicy::NewestFirst,
            client_timeout: Duration::from_secs(5),
            archive_after: None,
            resend_interval: Some(Duration::from_millis(500)),
            broadcast_interval: None,
            welcome_payload: Some(b"welcome".to_vec()),
        }
    }
}

/// Maps a millisecond CLI value to an optional interval, 0 meaning off
pub fn interval_from_millis(millis: u64) -> Option<Duration> {
    (millis > 0).then(|| Duration::from_millis(millis))
}

/// Same as `interval_from_millis` for values given in seconds
pub fn interval_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

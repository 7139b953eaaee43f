//! Runtime configuration.
//!
//! Defaults reproduce the constants the lease server has always shipped with:
//! twelve workers, a ten second lease, ten-message queues.

use std::{path::PathBuf, time::Duration};

/// Name of the shared inbound request channel.
pub const REQUEST_CHANNEL: &str = "/server_requests";

/// Name of the store file, relative to the server's working directory.
pub const STORE_FILE: &str = "db";

/// Configuration for [`crate::LeaseServer`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Path of the persistent lease store.
    pub store_path: PathBuf,
    /// Worker pool capacity.
    pub workers: usize,
    /// Lease time-to-live in seconds. Also bounds reply delivery.
    pub lease_ttl: i64,
    /// Name of the inbound request channel.
    pub request_channel: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from(STORE_FILE),
            workers: 12,
            lease_ttl: 10,
            request_channel: REQUEST_CHANNEL.to_string(),
        }
    }
}

impl ServerConfig {
    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = path.into();
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_lease_ttl(mut self, seconds: i64) -> Self {
        self.lease_ttl = seconds;
        self
    }

    pub fn with_request_channel(mut self, name: impl Into<String>) -> Self {
        self.request_channel = name.into();
        self
    }
}

/// Limits shared by every transport implementation.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Messages a channel holds before senders block.
    pub queue_capacity: usize,
    /// Largest payload a channel accepts.
    pub max_message_size: usize,
    /// Directory holding socket files for [`crate::transport::UnixDatagramTransport`].
    pub socket_dir: PathBuf,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10,
            max_message_size: 2048,
            socket_dir: std::env::temp_dir().join("token-lease"),
        }
    }
}

impl TransportConfig {
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_socket_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.socket_dir = dir.into();
        self
    }
}

/// Configuration for [`crate::client::LeaseClient`] and
/// [`crate::client::ClientSession`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Requests issued by one session.
    pub runs: usize,
    /// Highest token id a session picks.
    pub max_token: u16,
    /// Lower bound of the pause before each request.
    pub wait_min: Duration,
    /// Upper bound (exclusive) of the pause before each request.
    pub wait_max: Duration,
    /// Give up waiting for a reply after this long. `None` waits forever.
    pub reply_timeout: Option<Duration>,
    /// Attempts at reaching a channel that does not exist yet.
    pub connect_attempts: usize,
    /// Pause between those attempts.
    pub connect_delay: Duration,
    /// Name of the server's request channel.
    pub request_channel: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            runs: 20,
            max_token: 20,
            wait_min: Duration::from_secs(0),
            wait_max: Duration::from_secs(3),
            reply_timeout: None,
            connect_attempts: 5,
            connect_delay: Duration::from_millis(200),
            request_channel: REQUEST_CHANNEL.to_string(),
        }
    }
}

impl ClientConfig {
    pub fn with_runs(mut self, runs: usize) -> Self {
        self.runs = runs;
        self
    }

    pub fn with_max_token(mut self, max_token: u16) -> Self {
        self.max_token = max_token;
        self
    }

    pub fn with_wait(mut self, min: Duration, max: Duration) -> Self {
        self.wait_min = min;
        self.wait_max = max.max(min);
        self
    }

    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = Some(timeout);
        self
    }

    pub fn with_request_channel(mut self, name: impl Into<String>) -> Self {
        self.request_channel = name.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_shipped_constants() {
        let server = ServerConfig::default();
        assert_eq!(server.workers, 12);
        assert_eq!(server.lease_ttl, 10);
        assert_eq!(server.request_channel, "/server_requests");
        assert_eq!(server.store_path, PathBuf::from("db"));

        let transport = TransportConfig::default();
        assert_eq!(transport.queue_capacity, 10);
        assert_eq!(transport.max_message_size, 2048);

        let client = ClientConfig::default();
        assert_eq!(client.runs, 20);
        assert_eq!(client.max_token, 20);
        assert!(client.reply_timeout.is_none());
    }

    #[test]
    fn builders_clamp_degenerate_values() {
        assert_eq!(ServerConfig::default().with_workers(0).workers, 1);
        let client = ClientConfig::default()
            .with_wait(Duration::from_secs(2), Duration::from_secs(1));
        assert_eq!(client.wait_max, Duration::from_secs(2));
    }
}

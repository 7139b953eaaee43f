//! Error types for the lease server and its clients.

use std::{io, path::PathBuf, time::Duration};

use thiserror::Error;
use tokio::task::JoinError;

pub type Result<T, E = LeaseError> = std::result::Result<T, E>;

/// Every failure the lease engine can report.
///
/// Protocol errors (see [`LeaseError::is_protocol`]) are discarded by the
/// receiving side. Everything else is fatal to the process that hit it.
#[derive(Debug, Error)]
pub enum LeaseError {
    /// The store file could not be opened or created.
    #[error("failed to open lease store {path}: {source}")]
    StoreOpen { path: PathBuf, source: io::Error },

    /// The store path exists but is a directory, symlink or device.
    #[error("lease store {path} is not a regular file")]
    NotRegularFile { path: PathBuf },

    /// A read, write, seek or flush on the store failed.
    #[error("lease store I/O failed during {operation}: {source}")]
    StoreIo {
        operation: &'static str,
        source: io::Error,
    },

    #[error("channel {channel} does not exist")]
    ChannelNotFound { channel: String },

    #[error("channel {channel} was closed")]
    ChannelClosed { channel: String },

    #[error("channel {channel} I/O failed during {operation}: {source}")]
    ChannelIo {
        channel: String,
        operation: &'static str,
        source: io::Error,
    },

    #[error("message of {size} bytes exceeds the {limit} byte limit")]
    MessageTooLarge { size: usize, limit: usize },

    #[error("malformed message: expected {expected} bytes, got {actual}")]
    MalformedMessage { expected: usize, actual: usize },

    #[error("unknown request kind {0}")]
    UnknownRequestKind(u32),

    #[error("no reply for token {token} within {timeout:?}")]
    ReplyTimeout { token: u16, timeout: Duration },

    /// A worker slot or a blocking store task panicked or was cancelled.
    #[error("{operation} task failed: {source}")]
    TaskJoin {
        operation: &'static str,
        source: JoinError,
    },
}

impl LeaseError {
    pub(crate) fn store_io(operation: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| LeaseError::StoreIo { operation, source }
    }

    pub(crate) fn channel_io(
        channel: &impl ToString,
        operation: &'static str,
    ) -> impl FnOnce(io::Error) -> Self {
        let channel = channel.to_string();
        move |source| LeaseError::ChannelIo {
            channel,
            operation,
            source,
        }
    }

    /// The target channel has not been created yet; a later attempt may work.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LeaseError::ChannelNotFound { .. })
    }

    /// The error describes a bad message rather than a broken resource.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            LeaseError::MalformedMessage { .. } | LeaseError::UnknownRequestKind(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        let missing = LeaseError::ChannelNotFound {
            channel: "/client_3".to_string(),
        };
        assert!(missing.is_retryable());
        assert!(!missing.is_protocol());

        let short = LeaseError::MalformedMessage {
            expected: 19,
            actual: 4,
        };
        assert!(short.is_protocol());
        assert!(!short.is_retryable());
        assert!(LeaseError::UnknownRequestKind(7).is_protocol());
    }

    #[test]
    fn messages_name_the_operation() {
        let err = LeaseError::store_io("flush record")(io::Error::new(
            io::ErrorKind::Other,
            "disk gone",
        ));
        assert_eq!(
            err.to_string(),
            "lease store I/O failed during flush record: disk gone"
        );
    }
}

use std::error::Error as StdError;

pub type Result<T> = std::result::Result<T, Error>;

/// Why a reply could not be delivered.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The reply target cannot be routed (missing chat id, no channel).
    #[error("invalid reply target: {message}")]
    InvalidTarget { message: String },

    #[error("no outbound registered for channel: {channel_type}")]
    UnknownChannel { channel_type: String },

    /// The adapter is registered but cannot send right now.
    #[error("channel unavailable: {message}")]
    Unavailable { message: String },

    /// The platform rejected the send.
    #[error("delivery to {channel_type} failed: {source}")]
    Delivery {
        channel_type: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn invalid_target(message: impl std::fmt::Display) -> Self {
        Self::InvalidTarget {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn unavailable(message: impl std::fmt::Display) -> Self {
        Self::Unavailable {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn unknown_channel(channel_type: impl std::fmt::Display) -> Self {
        Self::UnknownChannel {
            channel_type: channel_type.to_string(),
        }
    }

    #[must_use]
    pub fn delivery(
        channel_type: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Delivery {
            channel_type: channel_type.into(),
            source: Box::new(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_error_keeps_source() {
        let err = Error::delivery(
            "telegram",
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "reset by peer"),
        );
        assert_eq!(err.to_string(), "delivery to telegram failed: reset by peer");
        assert!(StdError::source(&err).is_some());
    }
}

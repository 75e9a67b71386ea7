//! Error types for relay links

/// Result type alias using relay Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in relay link operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Media source unavailable or access denied
    #[error("Capture error: {0}")]
    Capture(String),

    /// Session description malformed, incompatible or rejected
    #[error("Negotiation error: {0}")]
    Negotiation(String),

    /// ICE candidate could not be parsed or applied
    #[error("ICE candidate error: {0}")]
    IceCandidate(String),

    /// Encoded-frame access requested on an endpoint created without it
    #[error("Frame interception disabled: {0}")]
    InterceptionDisabled(String),

    /// Operation not valid in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The link was closed while the operation was pending
    #[error("Link closed: {0}")]
    LinkClosed(String),

    /// Link not found
    #[error("Link not found: {0}")]
    LinkNotFound(String),

    /// Signaling channel error
    #[error("Signaling error: {0}")]
    Signaling(String),

    /// Media track error
    #[error("Media track error: {0}")]
    MediaTrack(String),

    /// Codec preference names a codec the sender cannot use (advisory)
    #[error("Unsupported codec preference: {0}")]
    UnsupportedCodecPreference(String),

    /// Operation timeout
    #[error("Operation timeout: {0}")]
    OperationTimeout(String),

    /// Frame transform error
    #[error(transparent)]
    Core(#[from] framerelay_core::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Error {
    /// Errors that end the affected link or source for good
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Error::Capture(_) | Error::Negotiation(_) | Error::LinkClosed(_)
        )
    }

    /// Errors that only affect a single frame
    pub fn is_frame_local(&self) -> bool {
        matches!(self, Error::Core(e) if e.is_frame_local())
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }

    /// Check if this error concerns link negotiation or connectivity
    pub fn is_link_error(&self) -> bool {
        matches!(
            self,
            Error::Negotiation(_)
                | Error::IceCandidate(_)
                | Error::LinkClosed(_)
                | Error::LinkNotFound(_)
                | Error::Signaling(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Negotiation("no common codec".to_string());
        assert_eq!(err.to_string(), "Negotiation error: no common codec");
    }

    #[test]
    fn test_is_terminal() {
        assert!(Error::Capture("denied".to_string()).is_terminal());
        assert!(Error::Negotiation("bad sdp".to_string()).is_terminal());
        assert!(!Error::UnsupportedCodecPreference("video/AV1".to_string()).is_terminal());
        assert!(!Error::IceCandidate("x".to_string()).is_terminal());
    }

    #[test]
    fn test_framing_is_frame_local() {
        let err = Error::from(framerelay_core::Error::framing("short", 2));
        assert!(err.is_frame_local());
        assert!(!err.is_terminal());
        assert!(!Error::Negotiation("x".to_string()).is_frame_local());
    }

    #[test]
    fn test_is_link_error() {
        assert!(Error::Signaling("closed".to_string()).is_link_error());
        assert!(!Error::InvalidConfig("x".to_string()).is_link_error());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::IoError(_)));
    }
}

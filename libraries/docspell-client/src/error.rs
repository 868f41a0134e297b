//! Error types for the Docspell client.

use thiserror::Error;

/// Errors that can occur when interacting with a Docspell server.
#[derive(Error, Debug)]
pub enum ServerClientError {
    /// HTTP request failed (connection, timeout, protocol)
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// A privileged endpoint answered 403 and the session never logged in
    #[error("Not authenticated: {0}")]
    NotAuthenticated(String),

    /// A privileged endpoint answered 403 although the session is logged in
    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    /// The server answered without a decodable JSON body
    #[error("Empty response, status code {status}")]
    EmptyResponse { status: u16 },

    /// Login was answered but not accepted by the server
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// Invalid server URL
    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),

    /// Upload input is not a readable, named file stream
    #[error("Invalid upload: {0}")]
    InvalidUpload(String),

    /// Failed to encode or decode JSON
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error while reading an upload stream
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The client was closed and its transport released
    #[error("Client has been shut down")]
    ClientShutdown,
}

impl ServerClientError {
    /// HTTP status attached to the error, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::EmptyResponse { status } => Some(*status),
            Self::NotAuthenticated(_) | Self::NotAuthorized(_) => Some(403),
            Self::Request(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Result type for server client operations.
pub type Result<T> = std::result::Result<T, ServerClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ServerClientError::EmptyResponse { status: 204 }.status(),
            Some(204)
        );
        assert_eq!(
            ServerClientError::NotAuthorized("GET /x".into()).status(),
            Some(403)
        );
        assert_eq!(ServerClientError::ClientShutdown.status(), None);
    }

    #[test]
    fn test_empty_response_message() {
        let err = ServerClientError::EmptyResponse { status: 500 };
        assert_eq!(err.to_string(), "Empty response, status code 500");
    }
}

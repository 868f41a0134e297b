//! Types for Docspell API requests, client configuration and session state.

use crate::error::Result;
use crate::transport::{RetryPolicy, Transport};
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// API protocol version used when the base URL does not embed one.
pub const DEFAULT_VERSION: u32 = 1;

/// Default total request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(12);

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(3050);

// =============================================================================
// Client Configuration
// =============================================================================

/// Options for constructing a [`DocspellClient`](crate::DocspellClient).
pub struct ClientOptions {
    /// API protocol version, ignored when the URL already embeds `/api/vN`
    pub version: u32,
    /// Total request timeout
    pub timeout: Duration,
    /// Connect timeout
    pub connect_timeout: Duration,
    /// Retry policy for the default transport
    pub retry: RetryPolicy,
    /// Replaces the default reqwest transport
    pub transport: Option<Box<dyn Transport>>,
    /// Log errors surfacing through teardown
    pub debug: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            version: DEFAULT_VERSION,
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            retry: RetryPolicy::default(),
            transport: None,
            debug: true,
        }
    }
}

impl ClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Use a custom transport instead of the built-in reqwest one.
    ///
    /// Timeouts and retry policy are then the transport's own business.
    pub fn with_transport(mut self, transport: Box<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOptions")
            .field("version", &self.version)
            .field("timeout", &self.timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("retry", &self.retry)
            .field("transport", &self.transport.as_ref().map(|_| "custom"))
            .field("debug", &self.debug)
            .finish()
    }
}

// =============================================================================
// Session State
// =============================================================================

/// Identity attached to an authenticated session.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Diagnostic tag, e.g. `user=collective/username`
    pub identity: String,
    /// Session token returned by the login endpoint
    pub token: Option<String>,
}

impl fmt::Debug for SessionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionInfo")
            .field("identity", &self.identity)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Authentication state of a client.
///
/// ```text
/// Uninitialized --login--> Authenticated --logout--> LoggedOut
///       any state --close--> Shutdown
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    /// Constructed, never logged in
    Uninitialized,
    /// Logged in
    Authenticated(SessionInfo),
    /// Logged out after a successful login
    LoggedOut,
    /// Closed; the transport has been released
    Shutdown,
}

impl AuthState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }

    pub(crate) fn token(&self) -> Option<&str> {
        match self {
            Self::Authenticated(info) => info.token.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Authenticated(info) => write!(f, "authenticated({})", info.identity),
            Self::LoggedOut => write!(f, "logged_out"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

// =============================================================================
// Authentication Types
// =============================================================================

/// Request body for the login endpoint.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LoginRequest<'a> {
    pub account: &'a str,
    pub password: &'a str,
    pub remember_me: bool,
}

// =============================================================================
// Upload Types
// =============================================================================

/// Direction of an uploaded document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Incoming,
    Outgoing,
}

/// Metadata sent as the `meta` part of an upload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadMetadata {
    /// Each file is a separate item when true
    pub multiple: bool,
    pub direction: Option<Direction>,
    /// Folder id to place the items in
    pub folder: Option<String>,
    pub skip_duplicates: bool,
    /// Tag names or ids, sent as `{"items": [...]}`
    #[serde(serialize_with = "serialize_tags")]
    pub tags: Vec<String>,
    /// Glob applied to archive entries
    pub file_filter: Option<String>,
    pub language: Option<String>,
    pub attachments_only: bool,
    pub flatten_archives: bool,
    /// Free-form data passed through to addons
    pub custom_data: Option<serde_json::Value>,
}

impl Default for UploadMetadata {
    fn default() -> Self {
        Self {
            multiple: false,
            direction: None,
            folder: None,
            skip_duplicates: true,
            tags: Vec::new(),
            file_filter: None,
            language: None,
            attachments_only: false,
            flatten_archives: false,
            custom_data: None,
        }
    }
}

impl UploadMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_multiple(mut self, multiple: bool) -> Self {
        self.multiple = multiple;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_folder(mut self, folder: impl Into<String>) -> Self {
        self.folder = Some(folder.into());
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }

    pub fn with_custom_data(mut self, data: serde_json::Value) -> Self {
        self.custom_data = Some(data);
        self
    }

    /// Render as the JSON value the server expects.
    pub fn to_value(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Render as a JSON string for the `meta` form part.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

fn serialize_tags<S: Serializer>(
    tags: &[String],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    #[derive(Serialize)]
    struct Items<'a> {
        items: &'a [String],
    }

    Items { items: tags }.serialize(serializer)
}

/// Progress information during upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadProgress {
    /// Payload bytes handed to the connection so far
    pub bytes_sent: u64,
    /// Payload bytes of all parts
    pub bytes_total: u64,
}

/// Callback invoked for every chunk read while an upload is transmitted.
pub type ProgressCallback = Arc<dyn Fn(UploadProgress) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_metadata_defaults() {
        let md = UploadMetadata::default();
        assert!(!md.multiple);
        assert!(md.direction.is_none());
        assert!(md.folder.is_none());
        assert!(md.skip_duplicates);
        assert!(md.tags.is_empty());
        assert!(md.file_filter.is_none());
        assert!(md.language.is_none());
        assert!(!md.attachments_only);
        assert!(!md.flatten_archives);
        assert!(md.custom_data.is_none());
    }

    #[test]
    fn test_metadata_tags_are_nested() {
        let md = UploadMetadata::new().with_tags(["one", "two"]);
        let value = md.to_value().unwrap();

        assert_eq!(value["tags"], json!({"items": ["one", "two"]}));
    }

    #[test]
    fn test_metadata_camel_case_keys() {
        let md = UploadMetadata::new()
            .with_multiple(true)
            .with_direction(Direction::Incoming)
            .with_language("deu");
        let value = md.to_value().unwrap();

        assert_eq!(value["multiple"], json!(true));
        assert_eq!(value["skipDuplicates"], json!(true));
        assert_eq!(value["flattenArchives"], json!(false));
        assert_eq!(value["attachmentsOnly"], json!(false));
        assert_eq!(value["direction"], json!("incoming"));
        assert_eq!(value["language"], json!("deu"));
        // Unset options are sent as null
        assert!(value["fileFilter"].is_null());
        assert!(value.as_object().unwrap().contains_key("customData"));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(AuthState::Uninitialized.to_string(), "uninitialized");
        assert_eq!(AuthState::LoggedOut.to_string(), "logged_out");
        assert_eq!(AuthState::Shutdown.to_string(), "shutdown");

        let state = AuthState::Authenticated(SessionInfo {
            identity: "user=test/test".into(),
            token: Some("secret".into()),
        });
        assert_eq!(state.to_string(), "authenticated(user=test/test)");
        assert_eq!(state.token(), Some("secret"));
        assert!(!format!("{state:?}").contains("secret"));
    }

    #[test]
    fn test_login_request_shape() {
        let request = LoginRequest {
            account: "test/test",
            password: "pw",
            remember_me: true,
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"account": "test/test", "password": "pw", "rememberMe": true})
        );
    }
}

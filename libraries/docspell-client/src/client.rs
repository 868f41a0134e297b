//! Main Docspell client.

use crate::error::{Result, ServerClientError};
use crate::transport::{
    RequestBody, ResponseBody, ReqwestTransport, Transport, TransportRequest,
};
use crate::types::{
    AuthState, ClientOptions, LoginRequest, ProgressCallback, SessionInfo, UploadMetadata,
};
use crate::upload::{source_upload_endpoint, MultipartUpload, UploadFile, UPLOAD_ENDPOINT};
use chrono::{NaiveDate, NaiveTime};
use reqwest::Method;
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use tokio::io::AsyncRead;
use tracing::{debug, error, info, warn};
use url::Url;

/// Header carrying the session token on authenticated requests.
pub const AUTH_HEADER: &str = "X-Docspell-Auth";

const API_PATH: &str = "/api/v";

// Item dates are sent as midday so timezone shifts stay within the same day.
const MIDDAY_MILLIS: i64 = 12 * 60 * 60 * 1000;

/// Client for a Docspell server.
///
/// The client owns its transport and tracks the authentication state of its
/// session. Release it with [`close`](Self::close), which logs out first.
///
/// # Example
///
/// ```ignore
/// use docspell_client::{ClientOptions, DocspellClient, UploadFile};
///
/// let mut client = DocspellClient::new("https://docs.example.com", ClientOptions::default())?;
/// client.login("family", "alice", "secret", true).await?;
///
/// let file = UploadFile::open("invoice.pdf").await?;
/// client.upload(file, None, None).await?;
///
/// client.close().await?;
/// ```
pub struct DocspellClient {
    base_url: String,
    api_url: String,
    version: u32,
    state: AuthState,
    transport: Option<Box<dyn Transport>>,
    timeout: Duration,
    debug: bool,
}

impl DocspellClient {
    /// Create a new client for the server at `base_url`.
    ///
    /// A URL that already contains `/api/vN` keeps that API URL and version;
    /// the version in `options` is then ignored.
    pub fn new(base_url: impl Into<String>, options: ClientOptions) -> Result<Self> {
        let url = base_url.into();
        let url = url.trim().trim_end_matches('/');

        if url.is_empty() {
            return Err(ServerClientError::InvalidUrl("URL cannot be empty".into()));
        }
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ServerClientError::InvalidUrl(
                "URL must start with http:// or https://".into(),
            ));
        }
        Url::parse(url).map_err(|e| ServerClientError::InvalidUrl(format!("{url}: {e}")))?;

        let (base_url, api_url, version) = if let Some(api) = api_path_index(url) {
            let version = embedded_version(url)?;
            warn!(
                url = %url,
                ignored_version = options.version,
                "/api/ in base URL, using its version instead"
            );
            (url[..api].to_string(), url.to_string(), version)
        } else {
            let api_url = Self::make_api_url(url, options.version);
            (url.to_string(), api_url, options.version)
        };

        let transport = match options.transport {
            Some(transport) => transport,
            None => Box::new(ReqwestTransport::new(
                options.timeout,
                options.connect_timeout,
                options.retry,
            )?),
        };

        debug!(base_url = %base_url, api_url = %api_url, version, "Client created");

        Ok(Self {
            base_url,
            api_url,
            version,
            state: AuthState::Uninitialized,
            transport: Some(transport),
            timeout: options.timeout,
            debug: options.debug,
        })
    }

    /// API URL for a base URL and protocol version.
    pub fn make_api_url(base_url: &str, version: u32) -> String {
        format!("{base_url}{API_PATH}{version}")
    }

    /// Full URL of an endpoint, relative to `api_url` or the versioned API URL.
    pub fn make_endpoint_url(
        base_url: &str,
        endpoint: &str,
        api_url: Option<&str>,
        version: u32,
    ) -> String {
        match api_url {
            Some(api_url) => format!("{api_url}/{endpoint}"),
            None => format!("{}/{}", Self::make_api_url(base_url, version), endpoint),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn state(&self) -> &AuthState {
        &self.state
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.is_authenticated()
    }

    // =========================================================================
    // Session
    // =========================================================================

    /// Login as `collective/username`.
    ///
    /// The session counts as authenticated only when the server reports
    /// `success: true`. Returns the server's answer unchanged.
    pub async fn login(
        &mut self,
        collective: &str,
        username: &str,
        password: &str,
        remember_me: bool,
    ) -> Result<Value> {
        let account = format!("{collective}/{username}");
        debug!(account = %account, "Attempting login");

        let request = LoginRequest {
            account: &account,
            password,
            remember_me,
        };
        let body = RequestBody::Json(serde_json::to_value(&request)?);
        let response = self.request(Method::POST, "open/auth/login", body).await?;

        if response.get("success").and_then(Value::as_bool) != Some(true) {
            let message = response
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("Login rejected")
                .to_string();
            warn!(account = %account, message = %message, "Login failed");
            return Err(ServerClientError::AuthFailed(message));
        }

        let token = response
            .get("token")
            .and_then(Value::as_str)
            .map(str::to_string);
        self.state = AuthState::Authenticated(SessionInfo {
            identity: format!("user={account}"),
            token,
        });

        info!(account = %account, "Logged in");
        Ok(response)
    }

    /// Logout. Does nothing unless the session is authenticated.
    pub async fn logout(&mut self) -> Result<Value> {
        if !self.state.is_authenticated() {
            return Ok(json!({}));
        }

        match self
            .request(Method::POST, "sec/auth/logout", RequestBody::Empty)
            .await
        {
            Ok(_) => {}
            Err(ServerClientError::EmptyResponse { status: 200 }) => {}
            Err(e) => return Err(e),
        }

        self.state = AuthState::LoggedOut;
        info!("Logged out");
        Ok(json!({}))
    }

    /// Logout and release the transport.
    ///
    /// The transport is released and the state becomes `Shutdown` even if the
    /// logout fails; the logout error is returned afterwards. Calling this
    /// again is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        if self.state == AuthState::Shutdown {
            return Ok(());
        }

        let logout = self.logout().await;
        self.release_transport();
        self.state = AuthState::Shutdown;
        debug!("Client shut down");

        if let Err(e) = logout {
            if self.debug {
                error!(error = %e, "Logout failed during shutdown");
            }
            return Err(e);
        }
        Ok(())
    }

    /// Close the client at the end of a unit of work.
    ///
    /// An error in `outcome` is logged in debug mode and takes precedence over
    /// a failure to close.
    pub async fn close_with<T>(&mut self, outcome: Result<T>) -> Result<T> {
        if let Err(e) = &outcome {
            if self.debug {
                error!(error = %e, state = %self.state, "Error while client was in use");
            }
        }

        let closed = self.close().await;
        let value = outcome?;
        closed?;
        Ok(value)
    }

    fn release_transport(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
    }

    // =========================================================================
    // Server
    // =========================================================================

    /// Server version info. Does not require authentication.
    pub async fn get_server_version(&self) -> Result<Value> {
        let url = Self::make_endpoint_url(
            &self.base_url,
            "api/info/version",
            Some(&self.base_url),
            self.version,
        );
        self.dispatch(Method::GET, url, Vec::new(), RequestBody::Empty)
            .await
    }

    /// Ask whether a file with the given SHA-256 digest is known.
    ///
    /// The server may answer `exists: false` for files it has; this is logged
    /// but the answer is returned as is.
    pub async fn check_file_exists(&self, digest: &str) -> Result<Value> {
        let endpoint = format!("sec/checkfile/{digest}");
        let response = self
            .request(Method::GET, &endpoint, RequestBody::Empty)
            .await?;

        if response.get("exists").and_then(Value::as_bool) == Some(false) {
            warn!(
                digest = %digest,
                "Server reports no file with this SHA256, but the file could exist, \
                 see https://github.com/eikek/docspell/issues/2328"
            );
        }
        Ok(response)
    }

    /// Current state of the job queue.
    pub async fn get_job_queue_state(&self) -> Result<Value> {
        self.request(Method::GET, "sec/queue/state", RequestBody::Empty)
            .await
    }

    // =========================================================================
    // Items
    // =========================================================================

    /// Set the date of an item, sent as midday UTC of `date`.
    pub async fn set_item_date(&self, item_id: &str, date: NaiveDate) -> Result<Value> {
        let endpoint = format!("sec/item/{item_id}/date");
        let body = RequestBody::Json(json!({ "date": date_to_epoch_millis(date) }));
        self.request(Method::PUT, &endpoint, body).await
    }

    /// Confirm an item, or move it back to created when `confirm` is false.
    pub async fn confirm_item(&self, item_id: &str, confirm: bool) -> Result<Value> {
        let action = if confirm { "confirm" } else { "unconfirm" };
        let endpoint = format!("sec/item/{item_id}/{action}");
        self.request(Method::POST, &endpoint, RequestBody::Empty)
            .await
    }

    pub async fn unconfirm_item(&self, item_id: &str) -> Result<Value> {
        self.confirm_item(item_id, false).await
    }

    // =========================================================================
    // Addons
    // =========================================================================

    /// Update an addon archive, in the background unless `sync` is set.
    pub async fn update_addon(&self, addon_id: &str, sync: bool) -> Result<Value> {
        let endpoint = format!("sec/addon/archive/{addon_id}");
        let url = self.endpoint_url(&endpoint);
        let query = vec![("sync".to_string(), sync.to_string())];

        let response = self
            .dispatch(Method::PUT, url, query, RequestBody::Empty)
            .await?;

        if let Some(message) = response.get("message").and_then(Value::as_str) {
            info!(addon = %addon_id, "{}", message);
        }
        Ok(response)
    }

    // =========================================================================
    // Uploads
    // =========================================================================

    /// Upload one file into the logged-in collective.
    pub async fn upload<R>(
        &self,
        file: UploadFile<R>,
        metadata: Option<&UploadMetadata>,
        progress: Option<ProgressCallback>,
    ) -> Result<Value>
    where
        R: AsyncRead + Unpin,
    {
        let upload = MultipartUpload::encode_single(file, metadata, progress).await?;
        self.send_upload(UPLOAD_ENDPOINT, upload).await
    }

    /// Upload several files into the logged-in collective.
    pub async fn upload_multiple<I, R>(
        &self,
        files: I,
        metadata: Option<&UploadMetadata>,
        progress: Option<ProgressCallback>,
    ) -> Result<Value>
    where
        I: IntoIterator<Item = UploadFile<R>>,
        R: AsyncRead + Unpin,
    {
        let upload = MultipartUpload::encode_multiple(files, metadata, progress).await?;
        self.send_upload(UPLOAD_ENDPOINT, upload).await
    }

    /// Upload one file through a public source. No login required.
    pub async fn upload_via_source<R>(
        &self,
        source: &str,
        file: UploadFile<R>,
        metadata: Option<&UploadMetadata>,
        progress: Option<ProgressCallback>,
    ) -> Result<Value>
    where
        R: AsyncRead + Unpin,
    {
        let upload = MultipartUpload::encode_single(file, metadata, progress).await?;
        self.send_upload(&source_upload_endpoint(source), upload)
            .await
    }

    /// Upload several files through a public source. No login required.
    pub async fn upload_multiple_via_source<I, R>(
        &self,
        source: &str,
        files: I,
        metadata: Option<&UploadMetadata>,
        progress: Option<ProgressCallback>,
    ) -> Result<Value>
    where
        I: IntoIterator<Item = UploadFile<R>>,
        R: AsyncRead + Unpin,
    {
        let upload = MultipartUpload::encode_multiple(files, metadata, progress).await?;
        self.send_upload(&source_upload_endpoint(source), upload)
            .await
    }

    async fn send_upload(&self, endpoint: &str, upload: MultipartUpload) -> Result<Value> {
        debug!(
            endpoint = %endpoint,
            files = upload.count_parts("file"),
            bytes = upload.total_len(),
            "Uploading"
        );
        self.request(Method::POST, endpoint, RequestBody::Multipart(upload))
            .await
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    fn endpoint_url(&self, endpoint: &str) -> String {
        Self::make_endpoint_url(&self.base_url, endpoint, Some(&self.api_url), self.version)
    }

    async fn request(&self, method: Method, endpoint: &str, body: RequestBody) -> Result<Value> {
        let url = self.endpoint_url(endpoint);
        self.dispatch(method, url, Vec::new(), body).await
    }

    async fn dispatch(
        &self,
        method: Method,
        url: String,
        query: Vec<(String, String)>,
        body: RequestBody,
    ) -> Result<Value> {
        let transport = self
            .transport
            .as_deref()
            .ok_or(ServerClientError::ClientShutdown)?;

        debug!(method = %method, url = %url, "> request");

        let mut request = TransportRequest::new(method.clone(), url.clone());
        request.query = query;
        request.body = body;
        if let Some(token) = self.state.token() {
            request
                .headers
                .push((AUTH_HEADER.to_string(), token.to_string()));
        }

        let response = transport.execute(request).await?;

        if response.status == 403 {
            let activity = format!("{method} {url}");
            return Err(if self.state.is_authenticated() {
                ServerClientError::NotAuthorized(activity)
            } else {
                ServerClientError::NotAuthenticated(activity)
            });
        }

        match response.decode() {
            ResponseBody::Json(value) => {
                debug!(status = response.status, "< response");
                Ok(value)
            }
            ResponseBody::Undecodable { status } => {
                debug!(status, "< empty response");
                Err(ServerClientError::EmptyResponse { status })
            }
        }
    }
}

impl fmt::Display for DocspellClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<DocspellClient url={} {}>", self.api_url, self.state)
    }
}

impl fmt::Debug for DocspellClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl Drop for DocspellClient {
    fn drop(&mut self) {
        if self.state.is_authenticated() {
            warn!(state = %self.state, "Client dropped without logout");
        }
        self.release_transport();
    }
}

/// Byte offset of the first `/api/` segment in the path of `url`.
fn api_path_index(url: &str) -> Option<usize> {
    let authority = url.find("://").map_or(0, |i| i + 3);
    let path = url[authority..].find('/').map(|i| authority + i)?;
    url[path..].find("/api/").map(|i| path + i)
}

/// Version number from the first `/vN` segment after `/api/`.
fn embedded_version(url: &str) -> Result<u32> {
    let api = api_path_index(url)
        .ok_or_else(|| ServerClientError::InvalidUrl(format!("no API path in {url}")))?;

    url[api..]
        .match_indices("/v")
        .find_map(|(index, _)| {
            let digits: String = url[api + index + 2..]
                .chars()
                .take_while(char::is_ascii_digit)
                .collect();
            digits.parse().ok()
        })
        .ok_or_else(|| ServerClientError::InvalidUrl(format!("no API version in {url}")))
}

/// Epoch milliseconds of `date` at 12:00 UTC.
fn date_to_epoch_millis(date: NaiveDate) -> i64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp_millis() + MIDDAY_MILLIS
}

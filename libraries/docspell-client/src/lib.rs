//! Docspell Client
//!
//! HTTP client library for the REST API of a Docspell document management
//! server.
//!
//! # Features
//!
//! - **Session**: Login/logout with an explicit authentication state machine
//! - **Upload**: Single and multi-file uploads with metadata and progress reporting
//! - **Items**: Confirm/unconfirm items, set item dates
//! - **Server**: Version info, job queue state, duplicate checks, addon updates
//!
//! # Example
//!
//! ```ignore
//! use docspell_client::{ClientOptions, DocspellClient, UploadFile, UploadMetadata};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = DocspellClient::new("https://docs.example.com", ClientOptions::default())?;
//!
//!     let version = client.get_server_version().await?;
//!     println!("Connected to Docspell {}", version["version"]);
//!
//!     client.login("family", "alice", "secret", true).await?;
//!
//!     let meta = UploadMetadata::new().with_tags(["invoice"]);
//!     let file = UploadFile::open("invoice.pdf").await?;
//!     client.upload(file, Some(&meta), None).await?;
//!
//!     client.close().await?;
//!     Ok(())
//! }
//! ```

mod client;
mod error;
mod transport;
mod types;
mod upload;

pub mod unique_id;

// Re-export main types
pub use client::{DocspellClient, AUTH_HEADER};
pub use error::{Result, ServerClientError};
pub use transport::{
    RequestBody, ReqwestTransport, ResponseBody, RetryPolicy, Transport, TransportRequest,
    TransportResponse,
};
pub use types::{
    AuthState, ClientOptions, Direction, ProgressCallback, SessionInfo, UploadMetadata,
    UploadProgress, DEFAULT_CONNECT_TIMEOUT, DEFAULT_TIMEOUT, DEFAULT_VERSION,
};
pub use upload::{
    source_upload_endpoint, FormPart, MultipartUpload, ProgressStream, UploadFile,
    UPLOAD_ENDPOINT,
};

//! Multipart upload encoding.
//!
//! An upload consists of an optional `meta` part carrying [`UploadMetadata`]
//! followed by one `file` part per stream, in the order given. Streams are
//! read to their end when the upload is encoded; they are not closed, so
//! callers may pass `&mut File`.

use crate::error::{Result, ServerClientError};
use crate::types::{ProgressCallback, UploadMetadata, UploadProgress};
use bytes::Bytes;
use futures_util::stream::{self, Stream};
use reqwest::multipart::{Form, Part};
use reqwest::Body;
use std::fmt;
use std::io::Cursor;
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, warn};

/// Endpoint for authenticated uploads.
pub const UPLOAD_ENDPOINT: &str = "sec/upload/item";

/// Endpoint for uploads through a public source.
pub fn source_upload_endpoint(source: &str) -> String {
    format!("open/upload/item/{source}")
}

const META_PART: &str = "meta";
const FILE_PART: &str = "file";

// Chunk size used when streaming part bodies with progress reporting.
const CHUNK_SIZE: usize = 64 * 1024;

/// A readable stream and the file name it is uploaded under.
pub struct UploadFile<R> {
    reader: R,
    name: Option<String>,
}

impl<R: AsyncRead + Unpin> UploadFile<R> {
    pub fn new(reader: R, name: impl Into<String>) -> Self {
        Self {
            reader,
            name: Some(name.into()),
        }
    }

    /// A stream without a name of its own. Single uploads reject it.
    pub fn unnamed(reader: R) -> Self {
        Self { reader, name: None }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref().filter(|name| !name.is_empty())
    }
}

impl UploadFile<Cursor<Vec<u8>>> {
    /// In-memory upload.
    pub fn from_bytes(data: impl Into<Vec<u8>>, name: impl Into<String>) -> Self {
        Self::new(Cursor::new(data.into()), name)
    }
}

impl UploadFile<File> {
    /// Open a file for upload, named after the file name of `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let metadata = tokio::fs::metadata(path).await.map_err(|e| {
            ServerClientError::InvalidUpload(format!("{}: {}", path.display(), e))
        })?;
        if !metadata.is_file() {
            return Err(ServerClientError::InvalidUpload(format!(
                "{} is not a regular file",
                path.display()
            )));
        }

        let reader = File::open(path).await.map_err(|e| {
            ServerClientError::InvalidUpload(format!("{}: {}", path.display(), e))
        })?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string);

        Ok(Self { reader, name })
    }
}

/// One part of a multipart body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormPart {
    name: &'static str,
    file_name: Option<String>,
    content_type: &'static str,
    data: Bytes,
}

impl FormPart {
    fn meta(json: String) -> Self {
        Self {
            name: META_PART,
            file_name: None,
            content_type: "application/json",
            data: Bytes::from(json),
        }
    }

    fn file(file_name: String, data: Vec<u8>) -> Self {
        Self {
            name: FILE_PART,
            file_name: Some(file_name),
            content_type: "application/octet-stream",
            data: Bytes::from(data),
        }
    }

    /// Form field name, `meta` or `file`.
    pub fn name(&self) -> &str {
        self.name
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    pub fn content_type(&self) -> &str {
        self.content_type
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }
}

/// An encoded multipart upload body.
pub struct MultipartUpload {
    parts: Vec<FormPart>,
    progress: Option<ProgressCallback>,
}

impl MultipartUpload {
    /// Encode several files, preceded by a `meta` part when metadata is given.
    pub async fn encode_multiple<I, R>(
        files: I,
        metadata: Option<&UploadMetadata>,
        progress: Option<ProgressCallback>,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = UploadFile<R>>,
        R: AsyncRead + Unpin,
    {
        let mut parts = Vec::new();

        if let Some(meta) = metadata {
            parts.push(FormPart::meta(meta.to_json()?));
        }

        for mut file in files {
            let name = file.name().map(str::to_string).ok_or_else(|| {
                ServerClientError::InvalidUpload("file stream has no name".into())
            })?;

            let mut data = Vec::new();
            file.reader.read_to_end(&mut data).await?;

            debug!(file = %name, size = data.len(), "Encoded file part");
            parts.push(FormPart::file(name, data));
        }

        Ok(Self { parts, progress })
    }

    /// Encode a single file.
    ///
    /// Metadata marked `multiple` is inconsistent with a single file; this is
    /// logged and the upload proceeds.
    pub async fn encode_single<R>(
        file: UploadFile<R>,
        metadata: Option<&UploadMetadata>,
        progress: Option<ProgressCallback>,
    ) -> Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        let Some(name) = file.name() else {
            return Err(ServerClientError::InvalidUpload(
                "file stream has no name and none was given".into(),
            ));
        };

        if metadata.is_some_and(|meta| meta.multiple) {
            warn!(file = %name, "Metadata is marked multiple but a single file is uploaded");
        }

        Self::encode_multiple(std::iter::once(file), metadata, progress).await
    }

    pub fn parts(&self) -> &[FormPart] {
        &self.parts
    }

    /// Number of parts with the given form field name.
    pub fn count_parts(&self, name: &str) -> usize {
        self.parts.iter().filter(|part| part.name == name).count()
    }

    /// Payload bytes across all parts.
    pub fn total_len(&self) -> u64 {
        self.parts.iter().map(|part| part.data.len() as u64).sum()
    }

    pub fn has_progress(&self) -> bool {
        self.progress.is_some()
    }

    /// Build a reqwest form. Progress, if monitored, restarts at zero.
    pub fn to_form(&self) -> Result<Form> {
        let total = self.total_len();
        let sent = Arc::new(AtomicU64::new(0));
        let mut form = Form::new();

        for part in &self.parts {
            let mut body = match &self.progress {
                Some(callback) => {
                    let stream = ProgressStream::with_counter(
                        chunked(part.data.clone()),
                        Arc::clone(callback),
                        total,
                        Arc::clone(&sent),
                    );
                    Part::stream_with_length(Body::wrap_stream(stream), part.data.len() as u64)
                }
                None => Part::bytes(part.data.to_vec()),
            };

            if let Some(file_name) = &part.file_name {
                body = body.file_name(file_name.clone());
            }
            form = form.part(part.name, body.mime_str(part.content_type)?);
        }

        Ok(form)
    }
}

impl fmt::Debug for MultipartUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultipartUpload")
            .field("parts", &self.parts.len())
            .field("bytes", &self.total_len())
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

fn chunked(data: Bytes) -> impl Stream<Item = std::io::Result<Bytes>> + Unpin {
    let chunks: Vec<std::io::Result<Bytes>> = (0..data.len())
        .step_by(CHUNK_SIZE)
        .map(|start| Ok(data.slice(start..(start + CHUNK_SIZE).min(data.len()))))
        .collect();
    stream::iter(chunks)
}

/// Byte stream wrapper that reports every chunk read through a callback.
///
/// The wrapped stream's items are passed on unchanged.
pub struct ProgressStream<S> {
    inner: S,
    callback: ProgressCallback,
    total: u64,
    sent: Arc<AtomicU64>,
}

impl<S> ProgressStream<S> {
    pub fn new(inner: S, callback: ProgressCallback, total: u64) -> Self {
        Self::with_counter(inner, callback, total, Arc::new(AtomicU64::new(0)))
    }

    // Parts of one form share a counter so progress covers the whole body.
    fn with_counter(
        inner: S,
        callback: ProgressCallback,
        total: u64,
        sent: Arc<AtomicU64>,
    ) -> Self {
        Self {
            inner,
            callback,
            total,
            sent,
        }
    }
}

impl<S> Stream for ProgressStream<S>
where
    S: Stream<Item = std::io::Result<Bytes>> + Unpin,
{
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let item = ready!(Pin::new(&mut self.inner).poll_next(cx));

        if let Some(Ok(chunk)) = &item {
            let len = chunk.len() as u64;
            let bytes_sent = self.sent.fetch_add(len, Ordering::Relaxed) + len;
            (self.callback)(UploadProgress {
                bytes_sent,
                bytes_total: self.total,
            });
        }

        Poll::Ready(item)
    }
}

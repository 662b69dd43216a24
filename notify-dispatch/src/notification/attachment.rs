//! Attachment resolution.
//!
//! Generated documents live at
//! `<data_root>[/<entity>]/<artifact_dir>/<ref>/<ref>.pdf`. When the
//! document for an event has already been generated it is attached to the
//! notification; when it has not, the notification goes out without it.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::events::{DEFAULT_ENTITY, NotificationCodeInfo, NotificationEvent};
use crate::utils::filename::sanitize_reference;
use crate::{Error, Result};

/// Extension of generated documents.
pub const DOCUMENT_EXTENSION: &str = "pdf";

/// A file attached to a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub path: PathBuf,
    pub mime_type: String,
    /// File name shown to the recipient.
    pub display_name: String,
}

impl Attachment {
    pub fn new(
        path: impl Into<PathBuf>,
        mime_type: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            mime_type: mime_type.into(),
            display_name: display_name.into(),
        }
    }
}

/// Backing store of generated documents.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Whether a regular file exists at `path`.
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Detected mime type of the file at `path`.
    async fn mime_type(&self, path: &Path) -> Result<String>;
}

/// Artifact store on the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsArtifactStore;

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn exists(&self, path: &Path) -> Result<bool> {
        match tokio::fs::metadata(path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::io_path("checking artifact", path, e)),
        }
    }

    async fn mime_type(&self, path: &Path) -> Result<String> {
        Ok(mime_from_path(path).to_string())
    }
}

/// Mime type guessed from a file extension.
pub fn mime_from_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match ext.as_str() {
        "pdf" => "application/pdf",
        "odt" => "application/vnd.oasis.opendocument.text",
        "ods" => "application/vnd.oasis.opendocument.spreadsheet",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "csv" => "text/csv",
        "txt" => "text/plain",
        "html" | "htm" => "text/html",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}

/// Naming convention for generated documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactLayout {
    pub data_root: PathBuf,
}

impl ArtifactLayout {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
        }
    }

    /// Output directory of `artifact_dir` for `entity`.
    ///
    /// The default entity keeps its documents directly under the data root;
    /// other entities get their own numbered sub-directory.
    pub fn output_dir(&self, artifact_dir: &str, entity: i64) -> PathBuf {
        if entity <= DEFAULT_ENTITY {
            self.data_root.join(artifact_dir)
        } else {
            self.data_root.join(entity.to_string()).join(artifact_dir)
        }
    }

    /// Expected document path for a sanitized reference.
    pub fn document_path(&self, artifact_dir: &str, entity: i64, reference: &str) -> PathBuf {
        self.output_dir(artifact_dir, entity)
            .join(reference)
            .join(format!("{}.{}", reference, DOCUMENT_EXTENSION))
    }
}

/// Locates the generated document of an event, if any.
#[derive(Clone)]
pub struct AttachmentResolver {
    store: Arc<dyn ArtifactStore>,
    layout: ArtifactLayout,
}

impl AttachmentResolver {
    pub fn new(store: Arc<dyn ArtifactStore>, layout: ArtifactLayout) -> Self {
        Self { store, layout }
    }

    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    /// Resolve the document of `event` for the object type described by
    /// `target`.
    ///
    /// A missing document is expected (it may not be generated yet) and
    /// yields `None`. Store failures are logged and also yield `None`: the
    /// document is optional, the notification is not.
    pub async fn resolve(
        &self,
        event: &NotificationEvent,
        target: &NotificationCodeInfo,
    ) -> Option<Attachment> {
        let reference = sanitize_reference(event.object.new_reference());
        if reference.is_empty() {
            debug!(object_id = event.object.id, "Object has no reference, no document to attach");
            return None;
        }

        let path = self
            .layout
            .document_path(target.artifact_dir, event.object.entity, &reference);

        match self.lookup(&path).await {
            Ok(Some(mime_type)) => Some(Attachment {
                display_name: format!("{}.{}", reference, DOCUMENT_EXTENSION),
                path,
                mime_type,
            }),
            Ok(None) => {
                debug!(path = %path.display(), "Document not generated yet, sending without it");
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to inspect document, sending without it");
                None
            }
        }
    }

    async fn lookup(&self, path: &Path) -> Result<Option<String>> {
        if !self.store.exists(path).await? {
            return Ok(None);
        }
        self.store.mime_type(path).await.map(Some)
    }
}

use crate::error::*;
use crate::generator::QuestionGenerator;
use crate::models::*;
use axum::{
    Json,
    extract::{Multipart, State},
};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

/// Multipart fields with this prefix carry files to stage.
pub const FILE_FIELD_PREFIX: &str = "file-";

// ============================================================================
// AppState
// ============================================================================

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<TempFileStore>,
    pub generator: Arc<dyn QuestionGenerator>,
    pub default_model: String,
}

// ============================================================================
// Temp File Store
// ============================================================================

/// Scratch directory bridging the upload request and the generation request.
#[derive(Debug, Clone)]
pub struct TempFileStore {
    root: PathBuf,
}

impl TempFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist an upload as `<epochMillis><ext>` and return its record.
    ///
    /// The directory is created on demand. Files are opened create-new, so a
    /// second upload landing on the same millisecond moves to the next free
    /// number instead of overwriting.
    pub async fn store(&self, original_name: &str, data: &[u8]) -> Result<StoredFile> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .context("Creating scratch directory")?;

        let extension = original_extension(original_name);
        let mut stamp = chrono::Utc::now().timestamp_millis();

        loop {
            let filename = format!("{}{}", stamp, extension);
            let path = self.root.join(&filename);

            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    file.write_all(data).await.context("Writing upload")?;
                    file.flush().await.context("Writing upload")?;
                    return Ok(StoredFile { filename, path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => stamp += 1,
                Err(e) => return Err(e).context("Creating upload file"),
            }
        }
    }

    pub async fn exists(&self, filename: &str) -> bool {
        let Some(path) = self.path_for(filename) else {
            return false;
        };
        tokio::fs::metadata(&path)
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false)
    }

    /// Records for the declared names that are present on disk, in order.
    pub async fn resolve(&self, filenames: &[String]) -> Vec<StoredFile> {
        let mut found = Vec::with_capacity(filenames.len());
        for filename in filenames {
            if self.exists(filename).await {
                if let Some(path) = self.path_for(filename) {
                    found.push(StoredFile {
                        filename: filename.clone(),
                        path,
                    });
                }
            }
        }
        found
    }

    /// Best-effort delete. Absent files are ignored, other failures only logged.
    pub async fn remove(&self, filename: &str) {
        let Some(path) = self.path_for(filename) else {
            return;
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => log::debug!("Removed scratch file {}", filename),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to delete {}: {}", path.display(), e),
        }
    }

    fn path_for(&self, filename: &str) -> Option<PathBuf> {
        is_plain_name(filename).then(|| self.root.join(filename))
    }
}

/// Names coming back from clients must stay inside the scratch directory.
fn is_plain_name(filename: &str) -> bool {
    !filename.is_empty()
        && filename != "."
        && filename != ".."
        && !filename.contains(['/', '\\', '\0'])
}

/// `.pdf` for `report.pdf`, empty when there is no usable extension.
fn original_extension(original_name: &str) -> String {
    Path::new(original_name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| format!(".{}", e))
        .unwrap_or_default()
}

// ============================================================================
// HTTP Handlers
// ============================================================================

/// POST /api/generate (multipart)
///
/// Stages every `file-*` field that carries a file.
pub async fn upload_files_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>> {
    let mut uploaded_files = Vec::new();

    while let Some(field) = multipart.next_field().await? {
        let is_file_field = field
            .name()
            .is_some_and(|name| name.starts_with(FILE_FIELD_PREFIX));
        let Some(original_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        if !is_file_field {
            continue;
        }

        let data = field.bytes().await?;
        let stored = state.store.store(&original_name, &data).await?;

        log::info!(
            "📥 Staged {} ({} bytes) as {}",
            original_name,
            data.len(),
            stored.filename
        );
        uploaded_files.push(stored.filename);
    }

    Ok(Json(UploadResponse::success(uploaded_files)))
}

// ============================================================================
// Tests
// ============================================================================

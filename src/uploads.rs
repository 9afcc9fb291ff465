//! Upload folder handling.
//!
//! Files are stored flat under the configured upload directory, keyed by
//! their (sanitized) client filename, and served back at `/uploads/<name>`.

use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{GatewayError, Result};

/// Public URL prefix the upload folder is mounted at.
pub const UPLOADS_ROUTE: &str = "/uploads";

/// A file written into the upload folder.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StoredUpload {
    pub filename: String,
    #[serde(skip)]
    pub path: PathBuf,
    pub url: String,
}

/// Reduce a client-supplied filename to a single safe path component.
///
/// Directory parts (either separator) are discarded, control characters are
/// removed, and names that collapse to nothing, `.` or `..` are rejected.
pub fn sanitize_filename(raw: &str) -> Result<String> {
    let last = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = last.chars().filter(|c| !c.is_control()).collect();
    let cleaned = cleaned.trim();

    if cleaned.is_empty() {
        return Err(GatewayError::BadRequest("No selected file".into()));
    }
    if cleaned == "." || cleaned == ".." {
        return Err(GatewayError::BadRequest(format!(
            "Invalid filename: {raw}"
        )));
    }
    Ok(cleaned.to_string())
}

#[derive(Debug, Clone)]
pub struct UploadDir {
    root: PathBuf,
}

impl UploadDir {
    /// Use `root` as the upload folder, creating it if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write `bytes` as `filename`, replacing any file of the same name.
    pub async fn save(&self, filename: &str, bytes: &[u8]) -> Result<StoredUpload> {
        let filename = sanitize_filename(filename)?;
        let path = self.root.join(&filename);
        tokio::fs::write(&path, bytes).await?;
        info!("Saved upload {} ({} bytes)", path.display(), bytes.len());
        Ok(StoredUpload {
            url: format!("{UPLOADS_ROUTE}/{filename}"),
            filename,
            path,
        })
    }

    /// Copy an existing file into the folder under its own file name.
    pub async fn import(&self, source: &Path) -> Result<StoredUpload> {
        let name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| GatewayError::BadRequest(format!("Invalid path: {}", source.display())))?;
        let bytes = tokio::fs::read(source).await?;
        self.save(name, &bytes).await
    }

    /// Map names relative to the upload folder onto existing files.
    ///
    /// Names that are unsafe or do not exist are dropped without error.
    pub fn resolve_existing<S: AsRef<str>>(&self, names: &[S]) -> Vec<PathBuf> {
        names
            .iter()
            .filter_map(|name| {
                let name = name.as_ref();
                let Ok(clean) = sanitize_filename(name) else {
                    debug!("Ignoring unsafe image name {:?}", name);
                    return None;
                };
                let path = self.root.join(clean);
                if path.is_file() {
                    Some(path)
                } else {
                    debug!("Ignoring missing image {}", path.display());
                    None
                }
            })
            .collect()
    }
}

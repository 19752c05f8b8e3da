//! Image catalog: the list of images produced by committing cubes.
//!
//! Stored as one JSON document (`{"custom_images": [...]}`) at an explicit
//! path. The document is always read and rewritten whole; writes go to a
//! sibling temp file that is then renamed over the original.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{StateError, StateResult};

/// One committed image.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageRecord {
    pub image: String,
    pub tag: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub size: String,
    /// RFC 3339 timestamp of the commit.
    #[serde(rename = "Pulled_on", default)]
    pub pulled_on: String,
}

impl ImageRecord {
    /// A record for a freshly committed `image:tag`, stamped with the current time.
    pub fn committed(image: &str, tag: &str) -> Self {
        Self {
            image: image.to_string(),
            tag: tag.to_string(),
            pulled_on: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            ..Self::default()
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogDocument {
    #[serde(default)]
    custom_images: Vec<ImageRecord>,
}

/// Catalog contents as returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageListing {
    pub custom_images: Vec<ImageRecord>,
    pub total_custom_images: usize,
}

/// File-backed image catalog. Appends are serialized within the process.
#[derive(Debug)]
pub struct ImageCatalog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl ImageCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record. A missing file is an empty catalog.
    pub fn list(&self) -> StateResult<ImageListing> {
        let custom_images = self.read()?.custom_images;
        Ok(ImageListing {
            total_custom_images: custom_images.len(),
            custom_images,
        })
    }

    /// Append a record unless one with the same image and tag exists.
    /// Returns whether the catalog changed.
    pub fn append(&self, record: ImageRecord) -> StateResult<bool> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|e| StateError::Catalog(e.to_string()))?;

        let mut doc = self.read()?;
        if doc
            .custom_images
            .iter()
            .any(|r| r.image == record.image && r.tag == record.tag)
        {
            debug!(image = %record.image, tag = %record.tag, "image already catalogued");
            return Ok(false);
        }
        info!(image = %record.image, tag = %record.tag, "image catalogued");
        doc.custom_images.push(record);
        self.write(&doc)?;
        Ok(true)
    }

    fn read(&self) -> StateResult<CatalogDocument> {
        match fs::read(&self.path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(CatalogDocument::default()),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                StateError::Deserialize(format!("{}: {e}", self.path.display()))
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(CatalogDocument::default()),
            Err(e) => Err(StateError::Catalog(format!("{}: {e}", self.path.display()))),
        }
    }

    fn write(&self, doc: &CatalogDocument) -> StateResult<()> {
        let io_err = |e: std::io::Error| StateError::Catalog(format!("{}: {e}", self.path.display()));
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_vec_pretty(doc).map_err(|e| StateError::Serialize(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)?;
        Ok(())
    }
}

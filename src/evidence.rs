//! Snapshot evidence for admitted incidents.
//!
//! Files land under a local root the backend also serves statically; callers
//! only ever see the public URL ([`EvidenceLocator`]).

use std::fmt;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

use crate::frame::{Frame, SNAPSHOT_JPEG_QUALITY};
use crate::{IncidentKind, SubjectId, Timestamp};

/// Static-file route the backend serves evidence from.
pub const UPLOADS_ROUTE: &str = "uploads";

#[derive(Debug, Error)]
pub enum EvidenceError {
    #[error("evidence root {path} is not writable: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode snapshot: {0}")]
    Encode(String),
    #[error("invalid public base url: {0}")]
    InvalidBaseUrl(String),
}

#[derive(Clone, Debug)]
pub struct EvidenceConfig {
    /// Local directory; must be the directory the backend serves as `/uploads`.
    pub root: PathBuf,
    pub public_base_url: Url,
    pub enabled: bool,
}

impl EvidenceConfig {
    pub fn new(root: impl Into<PathBuf>, public_base_url: &str) -> Result<Self, EvidenceError> {
        let public_base_url = Url::parse(public_base_url)
            .map_err(|e| EvidenceError::InvalidBaseUrl(format!("{public_base_url}: {e}")))?;
        if public_base_url.cannot_be_a_base() {
            return Err(EvidenceError::InvalidBaseUrl(public_base_url.to_string()));
        }
        Ok(Self {
            root: root.into(),
            public_base_url,
            enabled: true,
        })
    }
}

/// Public reference to a saved snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EvidenceLocator {
    url: Url,
    file_name: String,
    sha256: String,
}

impl EvidenceLocator {
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Hex SHA-256 of the JPEG bytes as written.
    pub fn sha256(&self) -> &str {
        &self.sha256
    }
}

impl fmt::Display for EvidenceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

/// `evidence_<subject>_<KIND>_<YYYYMMDD_HHMMSS>.jpg`, unique per subject, kind and second.
pub fn evidence_file_name(
    subject_id: SubjectId,
    kind: IncidentKind,
    timestamp: Timestamp,
) -> String {
    format!(
        "evidence_{}_{}_{}.jpg",
        subject_id,
        kind.as_str(),
        timestamp.format("%Y%m%d_%H%M%S")
    )
}

#[derive(Debug)]
pub struct EvidenceStore {
    config: EvidenceConfig,
}

impl EvidenceStore {
    pub fn new(config: EvidenceConfig) -> Self {
        Self { config }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    /// Encode `frame` as JPEG and write it atomically under the root.
    pub fn save(
        &self,
        frame: &Frame,
        subject_id: SubjectId,
        kind: IncidentKind,
        timestamp: Timestamp,
    ) -> Result<EvidenceLocator, EvidenceError> {
        let jpeg = frame
            .encode_jpeg(SNAPSHOT_JPEG_QUALITY)
            .map_err(|e| EvidenceError::Encode(e.to_string()))?;

        let file_name = evidence_file_name(subject_id, kind, timestamp);
        let root = &self.config.root;
        fs::create_dir_all(root).map_err(|source| EvidenceError::Persist {
            path: root.clone(),
            source,
        })?;
        let path = root.join(&file_name);
        write_atomic(&path, &jpeg).map_err(|source| EvidenceError::Persist { path, source })?;

        Ok(EvidenceLocator {
            url: self.public_url(&file_name)?,
            file_name,
            sha256: hex::encode(Sha256::digest(&jpeg)),
        })
    }

    /// Local path behind a locator issued by this store, if the file exists.
    pub fn resolve(&self, locator: &EvidenceLocator) -> Option<PathBuf> {
        let name = locator.file_name();
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return None;
        }
        if self.public_url(name).ok().as_ref() != Some(locator.url()) {
            return None;
        }
        let path = self.config.root.join(name);
        path.is_file().then_some(path)
    }

    fn public_url(&self, file_name: &str) -> Result<Url, EvidenceError> {
        let mut url = self.config.public_base_url.clone();
        url.path_segments_mut()
            .map_err(|_| EvidenceError::InvalidBaseUrl(self.config.public_base_url.to_string()))?
            .pop_if_empty()
            .push(UPLOADS_ROUTE)
            .push(file_name);
        Ok(url)
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let tmp_path = path.with_extension("jpg.tmp");
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(tmp_path, path)
}

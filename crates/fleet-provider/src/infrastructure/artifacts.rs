//! Provisioning artifacts read from zip bundles.
//!
//! Two bundles ship with the provider: the STF prebuilt tree (minicap and
//! minitouch for every ABI and SDK level) and the atx-agent release (one
//! binary per architecture).  Downloading and caching the bundles is done
//! outside the provider; here they are plain files on disk.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use thiserror::Error;
use zip::result::ZipError;
use zip::ZipArchive;

/// Error type for bundle access.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("I/O error reading bundle {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("bundle {path} is not a valid zip: {source}")]
    Zip {
        path: PathBuf,
        #[source]
        source: ZipError,
    },
}

/// Which bundle an artifact lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bundle {
    Stf,
    Agent,
}

/// Resolves artifact bytes by bundle and entry name.
pub trait ArtifactSource: Send + Sync {
    /// Returns the entry's bytes, or `None` if the bundle has no such entry.
    fn load(&self, bundle: Bundle, entry: &str) -> Result<Option<Vec<u8>>, ArtifactError>;
}

/// Reads entries straight out of the two zip files.
#[derive(Debug, Clone)]
pub struct ZipBundles {
    stf: PathBuf,
    agent: PathBuf,
}

impl ZipBundles {
    pub fn new(stf: impl Into<PathBuf>, agent: impl Into<PathBuf>) -> Self {
        Self {
            stf: stf.into(),
            agent: agent.into(),
        }
    }

    fn path(&self, bundle: Bundle) -> &Path {
        match bundle {
            Bundle::Stf => &self.stf,
            Bundle::Agent => &self.agent,
        }
    }
}

impl ArtifactSource for ZipBundles {
    fn load(&self, bundle: Bundle, entry: &str) -> Result<Option<Vec<u8>>, ArtifactError> {
        let path = self.path(bundle);
        let io_err = |source| ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        };
        let zip_err = |source| ArtifactError::Zip {
            path: path.to_path_buf(),
            source,
        };

        let file = File::open(path).map_err(io_err)?;
        let mut archive = ZipArchive::new(file).map_err(zip_err)?;
        let mut member = match archive.by_name(entry) {
            Ok(member) => member,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(e) => return Err(zip_err(e)),
        };
        let mut data = Vec::with_capacity(member.size() as usize);
        member.read_to_end(&mut data).map_err(io_err)?;
        Ok(Some(data))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

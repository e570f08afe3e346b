//! Reads APK manifests with `aapt dump badging`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fleet_core::domain::package::PackageManifest;
use fleet_core::protocol::parse::parse_badging;
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    Exit {
        program: PathBuf,
        status: i32,
        stderr: String,
    },

    #[error("no package line in badging output of {0}")]
    Unparseable(PathBuf),
}

/// Reads the package identity of an APK.
#[async_trait]
pub trait ManifestReader: Send + Sync {
    async fn read_manifest(&self, apk: &Path) -> Result<PackageManifest, ManifestError>;
}

/// [`ManifestReader`] backed by the `aapt` executable.
#[derive(Debug, Clone)]
pub struct AaptManifestReader {
    program: PathBuf,
}

impl AaptManifestReader {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl ManifestReader for AaptManifestReader {
    async fn read_manifest(&self, apk: &Path) -> Result<PackageManifest, ManifestError> {
        let output = Command::new(&self.program)
            .args(["dump", "badging"])
            .arg(apk)
            .output()
            .await
            .map_err(|source| ManifestError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ManifestError::Exit {
                program: self.program.clone(),
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_badging(&String::from_utf8_lossy(&output.stdout))
            .ok_or_else(|| ManifestError::Unparseable(apk.to_path_buf()))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

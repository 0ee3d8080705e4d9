// ─────────────────────────────────────────────────────────────────────────────
//  buildtools :: cache  —  installed-artifact markers
//
//  Layout under the third-party root:
//    <root>/<artifact>/.sha        ← accelerator bundle checksum
//    <root>/<artifact>/.version    ← SDK release version
//
//  The marker is the last thing written by a successful install, so a marker
//  that matches means the payload next to it is complete.
// ─────────────────────────────────────────────────────────────────────────────

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::artifact::ArtifactSpec;
use crate::env::Environment;
use crate::error::Result;

/// The on-disk record of what is installed for one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallMarker {
    pub value: String,
    pub path:  PathBuf,
}

#[derive(Debug, Clone)]
pub struct CacheStore {
    root:             PathBuf,
    force_redownload: bool,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>, env: &Environment) -> Self {
        Self { root: root.into(), force_redownload: env.force_redownload }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<artifact>/`
    pub fn artifact_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn marker_path(&self, spec: &ArtifactSpec) -> PathBuf {
        self.artifact_dir(&spec.name).join(spec.marker.file_name())
    }

    /// Current marker, if one has been written.
    pub fn installed_marker(&self, spec: &ArtifactSpec) -> Option<InstallMarker> {
        let path = self.marker_path(spec);
        let raw = fs::read_to_string(&path).ok()?;
        Some(InstallMarker { value: raw.trim().to_owned(), path })
    }

    /// True iff the marker exists and holds exactly `desired`.
    /// Always false while a forced redownload is requested.
    pub fn is_installed(&self, spec: &ArtifactSpec, desired: &str) -> bool {
        if self.force_redownload {
            log::debug!("{}: forced redownload requested", spec.name);
            return false;
        }
        match self.installed_marker(spec) {
            Some(m) => m.value == desired,
            None => false,
        }
    }

    /// Write the marker. Goes through a temp file + rename so a crash never
    /// leaves a half-written stamp behind.
    pub fn record_installed(&self, spec: &ArtifactSpec, value: &str) -> Result<()> {
        let path = self.marker_path(spec);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        log::debug!("{}: marker {} = {}", spec.name, path.display(), value);
        Ok(())
    }

    pub fn clear_marker(&self, spec: &ArtifactSpec) -> Result<()> {
        match fs::remove_file(self.marker_path(spec)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
//  buildtools :: pipeline  —  cache check → download → verify → install → mark
//
//  The marker is cleared once a verified archive is in hand and written
//  again only after the install succeeded. A failed download leaves the
//  previous install and marker untouched; a failed install leaves no marker.
// ─────────────────────────────────────────────────────────────────────────────

use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use crate::artifact::ArtifactSpec;
use crate::cache::CacheStore;
use crate::download::{Downloader, Transfer};
use crate::error::Result;
use crate::install::{ArchiveInstaller, SwapStrategy};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    AlreadyInstalled,
    Installed(PathBuf),
}

/// Progress notifications for the front end.
#[derive(Debug, Clone, Copy)]
pub enum Stage<'a> {
    Downloading { name: &'a str, url: &'a str },
    Extracting { name: &'a str },
}

pub struct Pipeline<'a, T: Transfer> {
    store:      &'a CacheStore,
    downloader: &'a Downloader<T>,
    installer:  &'a ArchiveInstaller<'a>,
}

impl<'a, T: Transfer> Pipeline<'a, T> {
    pub fn new(
        store: &'a CacheStore,
        downloader: &'a Downloader<T>,
        installer: &'a ArchiveInstaller<'a>,
    ) -> Self {
        Self { store, downloader, installer }
    }

    pub fn store(&self) -> &CacheStore {
        self.store
    }

    /// Make sure `spec` is installed with `marker_value` recorded.
    pub fn ensure(
        &self,
        spec: &ArtifactSpec,
        marker_value: &str,
        swap: &SwapStrategy,
        report: &dyn Fn(Stage<'_>),
    ) -> Result<Outcome> {
        if self.store.is_installed(spec, marker_value) {
            log::debug!("{} {} already installed", spec.name, marker_value);
            return Ok(Outcome::AlreadyInstalled);
        }

        let archive = self.store.artifact_dir(&spec.name).join(spec.archive_file_name());
        report(Stage::Downloading { name: &spec.name, url: &spec.source_url });
        let verified = self.downloader.download(&spec.source_url, &spec.checksum, &archive)?;

        let staged = self.store.clear_marker(spec)
            .and_then(|_| move_into_place(&verified, &archive).map_err(Into::into));
        if let Err(e) = staged {
            let _ = fs::remove_file(&verified);
            return Err(e);
        }

        report(Stage::Extracting { name: &spec.name });
        let installed = self.installer.install(&archive, spec.archive_kind, &spec.install_dir, swap)?;

        self.store.record_installed(spec, marker_value)?;
        Ok(Outcome::Installed(installed))
    }
}

/// Rename `from` onto `to`, clearing whatever occupies `to` first.
fn move_into_place(from: &Path, to: &Path) -> io::Result<()> {
    match fs::symlink_metadata(to) {
        Ok(m) if m.is_dir() => fs::remove_dir_all(to)?,
        Ok(_) => fs::remove_file(to)?,
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    fs::rename(from, to)
}

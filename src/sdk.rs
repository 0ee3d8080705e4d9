// ─────────────────────────────────────────────────────────────────────────────
//  buildtools :: sdk  —  pinned macOS platform SDK
//
//  Layout under the third-party root:
//    sdk/.version          ← version string of the active SDK
//    sdk/SDK-14.3.1.app/   ← one directory per installed release
//    sdk/SDK.app           ← symlink to the active release
//
//  The version comes from the checkout (see `candidate_sources`), falling
//  back to the newest configured release.
// ─────────────────────────────────────────────────────────────────────────────

use std::fs;
use std::path::{Path, PathBuf};

use crate::artifact::{ArchiveKind, ArtifactSpec, MarkerKind};
use crate::cache::CacheStore;
use crate::checksum::{Checksum, ChecksumAlgorithm};
use crate::config::{SdkConfig, SdkRelease};
use crate::download::Transfer;
use crate::env::{Environment, OsFamily};
use crate::error::{Result, ToolsError};
use crate::install::{versioned_sibling, SwapStrategy};
use crate::pipeline::{Outcome, Pipeline, Stage};
use crate::resolver::{self, CandidateSource, PlatformConstraint, Resolution};

pub const NAME: &str = "sdk";
pub const LINK_NAME: &str = "SDK.app";

/// Tried in this order when `sdk.sources` is empty.
const DEFAULT_SOURCES: &[(&str, &str)] = &[
    (".sdk-version",        r"^\s*([0-9]+(?:\.[0-9]+)*)\s*$"),
    ("build/ci/config.yml", r#"sdk[-_]version:\s*['"]?([0-9]+(?:\.[0-9]+)*)"#),
];

pub struct Sdk<'a> {
    cfg:         &'a SdkConfig,
    env:         &'a Environment,
    root:        PathBuf,
    source_root: PathBuf,
}

impl<'a> Sdk<'a> {
    pub fn new(
        cfg: &'a SdkConfig,
        env: &'a Environment,
        store: &CacheStore,
        source_root: impl Into<PathBuf>,
    ) -> Self {
        Self { cfg, env, root: store.artifact_dir(NAME), source_root: source_root.into() }
    }

    /// Only macOS builds use a pinned SDK, and only when releases are listed.
    pub fn applies(&self) -> bool {
        self.env.os == OsFamily::Mac && !self.cfg.versions.is_empty()
    }

    pub fn known_versions(&self) -> Vec<String> {
        self.cfg.versions.iter().map(|r| r.version.clone()).collect()
    }

    pub fn candidate_sources(&self) -> Result<Vec<CandidateSource>> {
        if self.cfg.sources.is_empty() {
            DEFAULT_SOURCES.iter()
                .map(|(path, pattern)| CandidateSource::new(self.source_root.join(path), pattern))
                .collect()
        } else {
            self.cfg.sources.iter()
                .map(|s| CandidateSource::new(self.source_root.join(&s.path), &s.pattern))
                .collect()
        }
    }

    /// Constraints that apply to this host's OS release.
    pub fn constraints(&self) -> Vec<PlatformConstraint> {
        let Some(major) = self.env.os_major else {
            return Vec::new();
        };
        self.cfg.constraints.iter()
            .filter(|c| major >= c.min_os_major)
            .map(|c| PlatformConstraint::min_version(
                format!("macOS {}+ requires SDK {} or newer", c.min_os_major, c.min_version),
                &c.min_version,
            ))
            .collect()
    }

    /// `requested` overrides detection and must name a configured release.
    pub fn resolve(&self, requested: Option<&str>) -> Result<Resolution> {
        let known = self.known_versions();
        match requested {
            Some(v) => resolver::requested(&known, v),
            None => resolver::resolve(&self.candidate_sources()?, &known, &self.constraints()),
        }
    }

    pub fn release(&self, version: &str) -> Result<&SdkRelease> {
        self.cfg.versions.iter()
            .find(|r| r.version == version)
            .ok_or_else(|| ToolsError::Config(format!("SDK {} is not configured", version)))
    }

    /// `sdk/SDK.app`
    pub fn link_path(&self) -> PathBuf {
        self.root.join(LINK_NAME)
    }

    /// `sdk/SDK-<version>.app`
    pub fn versioned_dir(&self, version: &str) -> PathBuf {
        versioned_sibling(&self.link_path(), version)
    }

    pub fn developer_dir(&self) -> PathBuf {
        self.link_path().join("Contents").join("Developer")
    }

    pub fn spec(&self, version: &str) -> Result<ArtifactSpec> {
        let release = self.release(version)?;
        let base = self.cfg.base_url.as_deref().ok_or_else(|| {
            ToolsError::Config("sdk.base_url is not set".into())
        })?;
        Ok(ArtifactSpec {
            name:         NAME.into(),
            platform_key: self.env.platform_key(),
            checksum:     Checksum::new(ChecksumAlgorithm::Md5, &release.md5)?,
            source_url:   format!("{}/{}", base.trim_end_matches('/'), release.file_name()),
            archive_kind: ArchiveKind::Zip,
            install_dir:  self.link_path(),
            marker:       MarkerKind::Version,
        })
    }

    /// Version recorded in `sdk/.version`, if any.
    pub fn installed_version(&self) -> Option<String> {
        let raw = fs::read_to_string(self.root.join(MarkerKind::Version.file_name())).ok()?;
        let v = raw.trim();
        if v.is_empty() { None } else { Some(v.to_owned()) }
    }

    /// Every `SDK-<version>.app` directory currently on disk.
    pub fn installed_versions(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return Vec::new();
        };
        let mut found: Vec<String> = entries
            .flatten()
            .filter(|e| e.path().is_dir())
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().to_string();
                name.strip_prefix("SDK-")?.strip_suffix(".app").map(str::to_owned)
            })
            .collect();
        found.sort_by(|a, b| resolver::cmp_ver(a, b));
        found
    }

    /// Install `version` and point `SDK.app` at it.
    pub fn ensure_installed<T: Transfer>(
        &self,
        pipeline: &Pipeline<'_, T>,
        version: &str,
        report: &dyn Fn(Stage<'_>),
    ) -> Result<Outcome> {
        let spec = self.spec(version)?;
        let swap = SwapStrategy::Symlink {
            versioned_dir: self.versioned_dir(version),
            previous:      self.installed_version(),
        };
        pipeline.ensure(&spec, version, &swap, report)
    }

    pub fn executor_env(&self) -> Vec<(String, String)> {
        vec![("DEVELOPER_DIR".to_owned(), self.developer_dir().to_string_lossy().into_owned())]
    }
}

/// Short human description of where a version came from.
pub fn describe(resolution: &Resolution, relative_to: &Path) -> String {
    match resolution {
        Resolution::Requested { version } => format!("{} (requested)", version),
        Resolution::Detected { version, source } => {
            let shown = source.strip_prefix(relative_to).unwrap_or(source);
            format!("{} (from {})", version, shown.display())
        }
        Resolution::Fallback { version, reason } => format!("{} (fallback: {})", version, reason),
    }
}

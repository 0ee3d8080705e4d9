// ─────────────────────────────────────────────────────────────────────────────
//  buildtools :: accelerator  —  distributed-compilation client
//
//  Layout under the third-party root:
//    accelerator/.sha               ← checksum of the installed bundle
//    accelerator/last-known-login   ← ms timestamp of the last good auth check
//    accelerator/client/            ← unpacked bundle (accel_ctl, accel_auth, …)
//
//  Bundles are published per platform at
//    <base_url>/<sha256>/accelerator-<platform>.<tgz|zip>
//  and the same SHA-256 doubles as the install marker.
// ─────────────────────────────────────────────────────────────────────────────

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::artifact::{ArchiveKind, ArtifactSpec, MarkerKind};
use crate::cache::CacheStore;
use crate::checksum::{Checksum, ChecksumAlgorithm};
use crate::config::{AcceleratorConfig, AcceleratorMode};
use crate::download::Transfer;
use crate::env::{Environment, OsFamily};
use crate::error::{Result, ToolsError};
use crate::install::SwapStrategy;
use crate::pipeline::{Outcome, Pipeline, Stage};
use crate::runner::{run_checked, CommandRunner, Invocation};

pub const NAME: &str = "accelerator";
pub const LOGIN_STAMP_FILE: &str = "last-known-login";
/// A successful auth check is trusted for this long.
pub const LOGIN_VALIDITY: Duration = Duration::from_secs(12 * 60 * 60);

const CTL_TOOL: &str = "accel_ctl";
const AUTH_TOOL: &str = "accel_auth";

pub struct Accelerator<'a> {
    cfg:    &'a AcceleratorConfig,
    env:    &'a Environment,
    root:   PathBuf,
    runner: &'a dyn CommandRunner,
}

impl<'a> Accelerator<'a> {
    pub fn new(
        cfg: &'a AcceleratorConfig,
        env: &'a Environment,
        store: &CacheStore,
        runner: &'a dyn CommandRunner,
    ) -> Self {
        Self { cfg, env, root: store.artifact_dir(NAME), runner }
    }

    pub fn mode(&self) -> AcceleratorMode {
        self.cfg.mode
    }

    pub fn enabled(&self) -> bool {
        self.cfg.mode != AcceleratorMode::None
    }

    pub fn client_dir(&self) -> PathBuf {
        self.root.join("client")
    }

    pub fn login_stamp_path(&self) -> PathBuf {
        self.root.join(LOGIN_STAMP_FILE)
    }

    /// The bundle for this host.
    pub fn spec(&self) -> Result<ArtifactSpec> {
        let key = self.env.platform_key();
        let sha = self.cfg.bundles.get(&key).ok_or_else(|| ToolsError::Config(format!(
            "no accelerator bundle configured for platform '{}' (accelerator.bundles)", key
        )))?;
        let checksum = Checksum::new(ChecksumAlgorithm::Sha256, sha)?;
        let base = self.cfg.base_url.as_deref().ok_or_else(|| {
            ToolsError::Config("accelerator.base_url is not set".into())
        })?;

        let archive_kind = match self.env.os {
            OsFamily::Windows => ArchiveKind::Zip,
            _ => ArchiveKind::TarGzip,
        };
        let source_url = format!(
            "{}/{}/accelerator-{}.{}",
            base.trim_end_matches('/'), checksum.hex(), key, archive_kind.extension()
        );

        Ok(ArtifactSpec {
            name: NAME.into(),
            platform_key: key,
            checksum,
            source_url,
            archive_kind,
            install_dir: self.client_dir(),
            marker: MarkerKind::Sha,
        })
    }

    pub fn is_installed(&self, store: &CacheStore) -> Result<bool> {
        let spec = self.spec()?;
        Ok(store.is_installed(&spec, spec.checksum.hex()))
    }

    /// Download and unpack the bundle unless the `.sha` marker already matches.
    pub fn ensure_installed<T: Transfer>(
        &self,
        pipeline: &Pipeline<'_, T>,
        report: &dyn Fn(Stage<'_>),
    ) -> Result<Outcome> {
        let spec = self.spec()?;
        let marker = spec.checksum.hex().to_owned();
        pipeline.ensure(&spec, &marker, &SwapStrategy::Replace, report)
    }

    // ── Auth ─────────────────────────────────────────────────────────────────

    pub fn is_authenticated(&self) -> Result<bool> {
        self.is_authenticated_at(now_ms())
    }

    /// Trust a recent stamp; otherwise ask the client and refresh the stamp.
    pub fn is_authenticated_at(&self, now: u64) -> Result<bool> {
        if let Some(stamp) = read_login_stamp(&self.login_stamp_path()) {
            if login_is_fresh(stamp, now) {
                log::debug!("accelerator login stamp is fresh");
                return Ok(true);
            }
        }
        let out = self.runner.run(&Invocation::new(self.tool(AUTH_TOOL)).arg("info"))?;
        if out.success() {
            write_login_stamp(&self.login_stamp_path(), now)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Interactive login, handled entirely by the client.
    pub fn login(&self) -> Result<()> {
        let inv = Invocation::new(self.tool(AUTH_TOOL)).arg("login").inherit_stdio();
        run_checked(self.runner, &inv)?;
        write_login_stamp(&self.login_stamp_path(), now_ms())
    }

    // ── Build integration ────────────────────────────────────────────────────

    /// Start the compiler proxy ahead of the build. Skipped on CI, where the
    /// executor env leaves auto-start off and the job manages the proxy.
    pub fn ensure_started(&self) -> Result<()> {
        if self.env.ci {
            return Ok(());
        }
        let inv = Invocation::new(self.tool(CTL_TOOL)).arg("ensure_start");
        run_checked(self.runner, &inv).map(|_| ())
    }

    pub fn gn_args(&self) -> Vec<String> {
        vec![
            "use_accelerator = true".into(),
            format!("accelerator_dir = \"{}\"", gn_path(&self.client_dir())),
        ]
    }

    pub fn executor_env(&self) -> Vec<(String, String)> {
        let mut env = vec![
            ("ACCEL_DIR".to_owned(), self.client_dir().to_string_lossy().into_owned()),
            ("ACCEL_START_COMPILER_PROXY".to_owned(), (!self.env.ci).to_string()),
        ];
        if self.cfg.mode == AcceleratorMode::CacheOnly {
            env.push(("ACCEL_CACHE_ONLY".to_owned(), "true".to_owned()));
        }
        env
    }

    /// `-j` to use when the caller did not pass one.
    pub fn default_jobs(&self) -> Option<u32> {
        match self.cfg.mode {
            AcceleratorMode::Cluster => Some(self.cfg.jobs),
            _ => None,
        }
    }

    fn tool(&self, name: &str) -> String {
        let file = match self.env.os {
            OsFamily::Windows => format!("{}.exe", name),
            _ => name.to_owned(),
        };
        self.client_dir().join(file).to_string_lossy().into_owned()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
//  Login stamp
// ─────────────────────────────────────────────────────────────────────────────

pub fn read_login_stamp(path: &Path) -> Option<u64> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

pub fn write_login_stamp(path: &Path, at_ms: u64) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, at_ms.to_string())?;
    Ok(())
}

/// Stamps from the future are treated as stale.
pub fn login_is_fresh(stamp_ms: u64, now_ms: u64) -> bool {
    now_ms >= stamp_ms && now_ms - stamp_ms < LOGIN_VALIDITY.as_millis() as u64
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// gn wants forward slashes, even on Windows.
fn gn_path(p: &Path) -> String {
    p.to_string_lossy().replace('\\', "/")
}

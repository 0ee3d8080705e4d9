// ─────────────────────────────────────────────────────────────────────────────
//  buildtools :: config  —  buildtools.toml
//
//  Lookup order:
//    1. --config <path>
//    2. BT_CONFIG env var
//    3. ./buildtools.toml
//    4. ~/.buildtools/config.toml
//
//  Minimal file:
//
//      root = "/home/me/checkout"
//      out  = "Testing"
//
//      [gen]
//      args = ['import("//build/args/testing.gn")']
//
//      [accelerator]
//      mode     = "cluster"
//      base_url = "https://accelerator.example.org/clients"
//      [accelerator.bundles]
//      linux-x64 = "<sha256>"
//
//      [sdk]
//      base_url = "https://sdk.example.org/releases"
//      [[sdk.versions]]
//      version = "14.3.1"
//      md5     = "<md5>"
// ─────────────────────────────────────────────────────────────────────────────

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Result, ToolsError};

pub const CONFIG_ENV_VAR: &str = "BT_CONFIG";
pub const LOCAL_CONFIG_FILE: &str = "buildtools.toml";

// ── Schema ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Checkout root. Relative paths are resolved against the config file.
    pub root: PathBuf,
    /// gn source root, relative to `root`.
    #[serde(default = "default_source_dir")]
    pub source_dir: String,
    /// Output directory name under `<source>/out/`.
    #[serde(default = "default_out")]
    pub out: String,
    #[serde(default = "default_target")]
    pub default_target: String,
    /// Where downloaded artifacts live (default `<root>/third_party`).
    pub third_party_root: Option<PathBuf>,
    #[serde(default = "default_generator")]
    pub generator: String,
    #[serde(default = "default_executor")]
    pub executor: String,
    #[serde(default)]
    pub gen: GenConfig,
    /// Extra environment for the build executor.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub accelerator: AcceleratorConfig,
    #[serde(default)]
    pub sdk: SdkConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenConfig {
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AcceleratorMode {
    #[default]
    None,
    CacheOnly,
    Cluster,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AcceleratorConfig {
    #[serde(default)]
    pub mode: AcceleratorMode,
    pub base_url: Option<String>,
    /// platform key → SHA-256 of the client bundle.
    #[serde(default)]
    pub bundles: BTreeMap<String, String>,
    /// Default `-j` in cluster mode.
    #[serde(default = "default_jobs")]
    pub jobs: u32,
}

impl Default for AcceleratorConfig {
    fn default() -> Self {
        Self { mode: AcceleratorMode::None, base_url: None, bundles: BTreeMap::new(), jobs: default_jobs() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SdkConfig {
    pub base_url: Option<String>,
    #[serde(default)]
    pub versions: Vec<SdkRelease>,
    /// Version sources in priority order; defaults when empty.
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default = "default_constraints")]
    pub constraints: Vec<OsConstraint>,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self { base_url: None, versions: Vec::new(), sources: Vec::new(), constraints: default_constraints() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SdkRelease {
    pub version: String,
    pub md5:     String,
    /// Archive name under `base_url` (default `SDK-<version>.zip`).
    pub file:    Option<String>,
}

impl SdkRelease {
    pub fn file_name(&self) -> String {
        self.file.clone().unwrap_or_else(|| format!("SDK-{}.zip", self.version))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SourceConfig {
    /// Relative to the gn source root.
    pub path:    PathBuf,
    pub pattern: String,
}

/// Hosts at or above `min_os_major` can not use SDKs older than `min_version`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OsConstraint {
    pub min_os_major: u32,
    pub min_version:  String,
}

fn default_source_dir() -> String { "src".into() }
fn default_out()        -> String { "Testing".into() }
fn default_target()     -> String { "app".into() }
fn default_generator()  -> String { "gn".into() }
fn default_executor()   -> String { "ninja".into() }
fn default_jobs()       -> u32    { 200 }

fn default_constraints() -> Vec<OsConstraint> {
    vec![OsConstraint { min_os_major: 13, min_version: "14.0.0".into() }]
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| {
            ToolsError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&raw, path)
    }

    /// Parse a config body; `path` anchors relative roots and error messages.
    pub fn parse(raw: &str, path: &Path) -> Result<Self> {
        let mut cfg: Config = toml::from_str(raw).map_err(|e| {
            ToolsError::Config(format!("malformed {}: {}", path.display(), e))
        })?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        if cfg.root.is_relative() {
            cfg.root = base.join(&cfg.root);
        }
        if let Some(tp) = &cfg.third_party_root {
            if tp.is_relative() {
                cfg.third_party_root = Some(base.join(tp));
            }
        }

        cfg.validate(path)?;
        Ok(cfg)
    }

    fn validate(&self, path: &Path) -> Result<()> {
        let bad = |msg: String| ToolsError::Config(format!("{}: {}", path.display(), msg));

        if self.out.trim().is_empty() || self.out.contains(['/', '\\']) {
            return Err(bad(format!("'out' must be a plain directory name, got '{}'", self.out)));
        }
        if self.accelerator.mode != AcceleratorMode::None && self.accelerator.base_url.is_none() {
            return Err(bad("accelerator.base_url is required when the accelerator is enabled".into()));
        }
        if !self.sdk.versions.is_empty() && self.sdk.base_url.is_none() {
            return Err(bad("sdk.base_url is required when sdk.versions are listed".into()));
        }
        Ok(())
    }

    /// Find the config file to use.
    pub fn discover(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(p) = explicit {
            return if p.is_file() {
                Ok(p.to_path_buf())
            } else {
                Err(ToolsError::Config(format!("config file {} not found", p.display())))
            };
        }

        let mut tried = Vec::new();
        if let Ok(p) = std::env::var(CONFIG_ENV_VAR) {
            tried.push(PathBuf::from(p));
        }
        tried.push(PathBuf::from(LOCAL_CONFIG_FILE));
        if let Some(home) = home_dir() {
            tried.push(home.join(".buildtools").join("config.toml"));
        }

        tried.iter().find(|p| p.is_file()).cloned().ok_or_else(|| {
            let list = tried.iter()
                .map(|p| format!("    {}", p.display()))
                .collect::<Vec<_>>()
                .join("\n");
            ToolsError::Config(format!("no config file found, looked in:\n{}", list))
        })
    }

    /// `<root>/<source_dir>`, where gn runs.
    pub fn source_root(&self) -> PathBuf {
        self.root.join(&self.source_dir)
    }

    /// `<root>/<source_dir>/out/<out>`
    pub fn out_dir(&self) -> PathBuf {
        self.source_root().join("out").join(&self.out)
    }

    pub fn third_party_root(&self) -> PathBuf {
        self.third_party_root.clone().unwrap_or_else(|| self.root.join("third_party"))
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .ok()
        .map(PathBuf::from)
}

// ─────────────────────────────────────────────────────────────────────────────
//  buildtools :: env  —  host environment, detected once per invocation
//
//  Built by the entry point and passed by reference to every resolver and
//  cache call. Nothing below re-reads the process environment on its own.
// ─────────────────────────────────────────────────────────────────────────────

use std::fmt;

use crate::error::{Result, ToolsError};
use crate::runner::{CommandRunner, Invocation};

/// Forces `is_installed` to report false for every artifact.
pub const FORCE_REDOWNLOAD_VAR: &str = "BT_FORCE_REDOWNLOAD";
/// Set by virtually every CI provider.
pub const CI_VAR: &str = "CI";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsFamily {
    Linux,
    Mac,
    Windows,
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OsFamily::Linux   => "linux",
            OsFamily::Mac     => "darwin",
            OsFamily::Windows => "win",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    X64,
    Arm64,
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Arch::X64   => "x64",
            Arch::Arm64 => "arm64",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    pub os:               OsFamily,
    pub arch:             Arch,
    /// Major OS release, only looked up on macOS (`sw_vers`).
    pub os_major:         Option<u32>,
    pub ci:               bool,
    pub force_redownload: bool,
}

impl Environment {
    pub fn new(os: OsFamily, arch: Arch) -> Self {
        Self { os, arch, os_major: None, ci: false, force_redownload: false }
    }

    /// Detect the running host. `runner` is only used for `sw_vers` on macOS.
    pub fn detect(runner: &dyn CommandRunner) -> Result<Self> {
        let os = host_os()?;
        let arch = host_arch()?;
        let os_major = match os {
            OsFamily::Mac => mac_major_version(runner),
            _ => None,
        };
        Ok(Self {
            os,
            arch,
            os_major,
            ci: env_flag(CI_VAR),
            force_redownload: env_flag(FORCE_REDOWNLOAD_VAR),
        })
    }

    /// `linux-x64`, `darwin-arm64`, `win-x64`, …
    pub fn platform_key(&self) -> String {
        format!("{}-{}", self.os, self.arch)
    }
}

fn host_os() -> Result<OsFamily> {
    #[cfg(target_os = "linux")]   { return Ok(OsFamily::Linux); }
    #[cfg(target_os = "macos")]   { return Ok(OsFamily::Mac); }
    #[cfg(target_os = "windows")] { return Ok(OsFamily::Windows); }
    #[allow(unreachable_code)]
    Err(ToolsError::Other(format!("Unsupported host OS '{}'", std::env::consts::OS)))
}

fn host_arch() -> Result<Arch> {
    #[cfg(target_arch = "x86_64")]  { return Ok(Arch::X64); }
    #[cfg(target_arch = "aarch64")] { return Ok(Arch::Arm64); }
    #[allow(unreachable_code)]
    Err(ToolsError::Other(format!("Unsupported host architecture '{}'", std::env::consts::ARCH)))
}

fn mac_major_version(runner: &dyn CommandRunner) -> Option<u32> {
    let out = runner.run(&Invocation::new("sw_vers").arg("-productVersion")).ok()?;
    if !out.success() {
        return None;
    }
    parse_major(&out.stdout)
}

fn parse_major(version: &str) -> Option<u32> {
    version.trim().split('.').next()?.parse().ok()
}

/// Unset, empty, `0` and `false` all count as off.
fn env_flag(name: &str) -> bool {
    match std::env::var(name) {
        Ok(v) => {
            let v = v.trim().to_ascii_lowercase();
            !(v.is_empty() || v == "0" || v == "false")
        }
        Err(_) => false,
    }
}

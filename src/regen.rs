// ─────────────────────────────────────────────────────────────────────────────
//  buildtools :: regen  —  does the output dir need `gn gen` again?
//
//  <out>/build.ninja   existence only
//  <out>/args.gn       compared against the desired args text
// ─────────────────────────────────────────────────────────────────────────────

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

pub const MANIFEST_FILE: &str = "build.ninja";
pub const ARGS_FILE: &str = "args.gn";

#[cfg(windows)]
const NATIVE_EOL: &str = "\r\n";
#[cfg(not(windows))]
const NATIVE_EOL: &str = "\n";

/// Build arguments for one output directory. The text is opaque.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredArgs {
    pub out_dir: PathBuf,
    pub text:    String,
}

impl DesiredArgs {
    pub fn new(out_dir: impl Into<PathBuf>, lines: &[String]) -> Self {
        Self { out_dir: out_dir.into(), text: lines.join("\n") }
    }

    pub fn needs_regeneration(&self) -> bool {
        needs_regeneration(&self.out_dir, &self.text)
    }

    pub fn persist(&self) -> Result<()> {
        persist_args(&self.out_dir, &self.text)
    }
}

/// True when nothing was generated yet or the persisted args differ.
pub fn needs_regeneration(out_dir: &Path, desired: &str) -> bool {
    if !out_dir.join(MANIFEST_FILE).is_file() {
        log::debug!("{} missing in {}", MANIFEST_FILE, out_dir.display());
        return true;
    }
    match fs::read_to_string(out_dir.join(ARGS_FILE)) {
        Ok(current) => normalize(&current) != normalize(desired),
        Err(_) => {
            log::debug!("{} missing in {}", ARGS_FILE, out_dir.display());
            true
        }
    }
}

/// Write `desired` as the persisted args, native line endings.
pub fn persist_args(out_dir: &Path, desired: &str) -> Result<()> {
    fs::create_dir_all(out_dir)?;
    let mut body = normalize(desired);
    body.push_str(NATIVE_EOL);
    fs::write(out_dir.join(ARGS_FILE), body)?;
    Ok(())
}

fn normalize(text: &str) -> String {
    text.trim().replace("\r\n", "\n").replace('\n', NATIVE_EOL)
}

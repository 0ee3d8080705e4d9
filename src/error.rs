// ─────────────────────────────────────────────────────────────────────────────
//  buildtools :: error
// ─────────────────────────────────────────────────────────────────────────────

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolsError {
    #[error("Download of {url} failed: {reason}")]
    TransferFailure { url: String, reason: String },

    #[error("Checksum mismatch for {}\n  expected: {expected}\n  computed: {computed}", path.display())]
    ChecksumMismatch { path: PathBuf, expected: String, computed: String },

    #[error("Failed to extract {}: {reason}\n  Scratch dir left at: {}", archive.display(), scratch.display())]
    ExtractionFailure { archive: PathBuf, scratch: PathBuf, reason: String },

    #[error("{tool} exited with status {code}")]
    SubprocessFailure { tool: String, code: i32 },

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl ToolsError {
    /// Process exit code for this failure. Wrapped tools keep their own code.
    pub fn exit_code(&self) -> i32 {
        match self {
            ToolsError::SubprocessFailure { code, .. } if *code != 0 => *code,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, ToolsError>;

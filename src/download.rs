// ─────────────────────────────────────────────────────────────────────────────
//  buildtools :: download  —  fetch to a temp file, verify, hand over
//
//  The bytes go to `<dest>.download`, never to `dest` itself, so a truncated
//  transfer can not be mistaken for a complete archive. The temp file is
//  removed on every failure path; on success its path is returned and the
//  caller moves it into place.
// ─────────────────────────────────────────────────────────────────────────────

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::checksum::{digest_file, Checksum};
use crate::error::{Result, ToolsError};

/// Moves the bytes behind `url` into `out`. Returns the byte count.
pub trait Transfer {
    fn fetch(&self, url: &str, out: &mut dyn Write) -> std::result::Result<u64, String>;
}

/// Plain HTTPS GET through `ureq`.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpTransfer;

impl Transfer for HttpTransfer {
    fn fetch(&self, url: &str, out: &mut dyn Write) -> std::result::Result<u64, String> {
        let resp = ureq::get(url).call().map_err(|e| match e {
            ureq::Error::Status(code, _) => format!("server answered HTTP {}", code),
            other => other.to_string(),
        })?;
        let mut reader = resp.into_reader();
        io::copy(&mut reader, out).map_err(|e| format!("read error: {}", e))
    }
}

/// Temp location used while `dest` is being downloaded.
pub fn temp_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "artifact".into());
    name.push(".download");
    dest.with_file_name(name)
}

pub struct Downloader<T: Transfer> {
    transfer: T,
}

impl<T: Transfer> Downloader<T> {
    pub fn new(transfer: T) -> Self {
        Self { transfer }
    }

    /// Download `url` next to `dest` and verify it against `expected`.
    /// Returns the verified temp path.
    pub fn download(&self, url: &str, expected: &Checksum, dest: &Path) -> Result<PathBuf> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = temp_path(dest);
        log::debug!("GET {} → {}", url, tmp.display());

        if let Err(reason) = self.fetch_into(url, &tmp) {
            remove_quietly(&tmp);
            return Err(ToolsError::TransferFailure { url: url.to_owned(), reason });
        }

        let computed = match digest_file(&tmp, expected.algorithm()) {
            Ok(c) => c,
            Err(e) => {
                remove_quietly(&tmp);
                return Err(e.into());
            }
        };

        if !expected.matches(&computed) {
            remove_quietly(&tmp);
            return Err(ToolsError::ChecksumMismatch {
                path:     dest.to_path_buf(),
                expected: expected.hex().to_owned(),
                computed,
            });
        }

        log::debug!("{} verified ({})", tmp.display(), expected);
        Ok(tmp)
    }

    fn fetch_into(&self, url: &str, tmp: &Path) -> std::result::Result<u64, String> {
        let file = File::create(tmp)
            .map_err(|e| format!("cannot create {}: {}", tmp.display(), e))?;
        let mut out = BufWriter::new(file);
        let bytes = self.transfer.fetch(url, &mut out)?;
        out.flush().map_err(|e| format!("cannot write {}: {}", tmp.display(), e))?;
        Ok(bytes)
    }
}

fn remove_quietly(path: &Path) {
    if path.exists() {
        let _ = fs::remove_file(path);
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use std::io::Write;

    use super::Transfer;

    /// Serves fixed bytes, or fails halfway through when `fail` is set.
    pub struct StaticTransfer {
        pub body: Vec<u8>,
        pub fail: Option<String>,
    }

    impl StaticTransfer {
        pub fn serving(body: &[u8]) -> Self {
            Self { body: body.to_vec(), fail: None }
        }

        pub fn failing(reason: &str) -> Self {
            Self { body: b"partial".to_vec(), fail: Some(reason.to_owned()) }
        }
    }

    impl Transfer for StaticTransfer {
        fn fetch(&self, _url: &str, out: &mut dyn Write) -> std::result::Result<u64, String> {
            out.write_all(&self.body).map_err(|e| e.to_string())?;
            match &self.fail {
                Some(reason) => Err(reason.clone()),
                None => Ok(self.body.len() as u64),
            }
        }
    }
}

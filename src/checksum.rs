// ─────────────────────────────────────────────────────────────────────────────
//  buildtools :: checksum
//
//  Artifacts are published with different digest families (the accelerator
//  with SHA-256, SDK releases with MD5), so the algorithm always travels with
//  the expected value.
// ─────────────────────────────────────────────────────────────────────────────

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use md5::Md5;
use sha2::{Digest, Sha256};

use crate::error::{Result, ToolsError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    Md5,
    Sha256,
}

impl ChecksumAlgorithm {
    /// Length of a hex-encoded digest.
    pub fn hex_len(self) -> usize {
        match self {
            ChecksumAlgorithm::Md5    => 32,
            ChecksumAlgorithm::Sha256 => 64,
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChecksumAlgorithm::Md5    => "MD5",
            ChecksumAlgorithm::Sha256 => "SHA-256",
        })
    }
}

/// An expected digest. The hex value is always stored lowercase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
    algorithm: ChecksumAlgorithm,
    hex:       String,
}

impl Checksum {
    pub fn new(algorithm: ChecksumAlgorithm, hex: &str) -> Result<Self> {
        let hex = hex.trim().to_ascii_lowercase();
        if hex.len() != algorithm.hex_len() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ToolsError::Config(format!(
                "'{}' is not a valid {} digest", hex, algorithm
            )));
        }
        Ok(Self { algorithm, hex })
    }

    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }

    pub fn matches(&self, computed: &str) -> bool {
        self.hex.eq_ignore_ascii_case(computed.trim())
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

/// Hex digest of a file's content, streamed.
pub fn digest_file(path: &Path, algorithm: ChecksumAlgorithm) -> io::Result<String> {
    let reader = BufReader::new(File::open(path)?);
    match algorithm {
        ChecksumAlgorithm::Md5    => digest_reader::<Md5, _>(reader),
        ChecksumAlgorithm::Sha256 => digest_reader::<Sha256, _>(reader),
    }
}

fn digest_reader<D: Digest, R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = D::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
    const HELLO_MD5: &str = "5d41402abc4b2a76b9719d911017c592";

    #[test]
    fn digests_file_with_requested_algorithm() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, b"hello").unwrap();

        assert_eq!(digest_file(&path, ChecksumAlgorithm::Sha256).unwrap(), HELLO_SHA256);
        assert_eq!(digest_file(&path, ChecksumAlgorithm::Md5).unwrap(), HELLO_MD5);
    }

    #[test]
    fn expected_value_is_normalized_to_lowercase() {
        let c = Checksum::new(ChecksumAlgorithm::Md5, &HELLO_MD5.to_uppercase()).unwrap();
        assert_eq!(c.hex(), HELLO_MD5);
        assert!(c.matches(HELLO_MD5));
        assert!(c.matches(&HELLO_MD5.to_uppercase()));
    }

    #[test]
    fn rejects_digest_of_the_wrong_family() {
        assert!(Checksum::new(ChecksumAlgorithm::Sha256, HELLO_MD5).is_err());
        assert!(Checksum::new(ChecksumAlgorithm::Md5, "zz41402abc4b2a76b9719d911017c592").is_err());
    }
}

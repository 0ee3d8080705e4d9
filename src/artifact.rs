// ─────────────────────────────────────────────────────────────────────────────
//  buildtools :: artifact  —  what gets downloaded and where it lands
// ─────────────────────────────────────────────────────────────────────────────

use std::path::PathBuf;

use crate::checksum::Checksum;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    TarGzip,
}

impl ArchiveKind {
    pub fn extension(self) -> &'static str {
        match self {
            ArchiveKind::Zip     => "zip",
            ArchiveKind::TarGzip => "tgz",
        }
    }
}

/// Which stamp file records the installed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    /// `.sha` — the bundle checksum.
    Sha,
    /// `.version` — a release version string.
    Version,
}

impl MarkerKind {
    pub fn file_name(self) -> &'static str {
        match self {
            MarkerKind::Sha     => ".sha",
            MarkerKind::Version => ".version",
        }
    }
}

/// One installable bundle for one platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSpec {
    /// Short name, also the directory under the third-party root.
    pub name:         String,
    pub platform_key: String,
    pub checksum:     Checksum,
    pub source_url:   String,
    pub archive_kind: ArchiveKind,
    /// Final location of the unpacked payload (or the symlink to it).
    pub install_dir:  PathBuf,
    pub marker:       MarkerKind,
}

impl ArtifactSpec {
    /// File name the archive is stored under while it is being installed.
    pub fn archive_file_name(&self) -> String {
        let from_url = self.source_url
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty() && s.contains('.'));
        match from_url {
            Some(name) => name.to_owned(),
            None => format!("{}-{}.{}", self.name, self.platform_key, self.archive_kind.extension()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::ChecksumAlgorithm;
    use pretty_assertions::assert_eq;

    fn spec(url: &str) -> ArtifactSpec {
        ArtifactSpec {
            name:         "accelerator".into(),
            platform_key: "linux-x64".into(),
            checksum:     Checksum::new(ChecksumAlgorithm::Md5, "5d41402abc4b2a76b9719d911017c592").unwrap(),
            source_url:   url.into(),
            archive_kind: ArchiveKind::TarGzip,
            install_dir:  PathBuf::from("/tmp/tp/accelerator/client"),
            marker:       MarkerKind::Sha,
        }
    }

    #[test]
    fn archive_name_comes_from_url_when_present() {
        assert_eq!(spec("https://cdn.example/abc/accelerator-linux-x64.tgz").archive_file_name(),
                   "accelerator-linux-x64.tgz");
    }

    #[test]
    fn archive_name_falls_back_to_artifact_identity() {
        assert_eq!(spec("https://cdn.example/download/").archive_file_name(),
                   "accelerator-linux-x64.tgz");
    }
}

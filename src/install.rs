// ─────────────────────────────────────────────────────────────────────────────
//  buildtools :: install  —  extract a verified archive and swap it into place
//
//  Pipeline:
//    1. Extract into a scratch dir next to the target  (<parent>/.<name>.extract)
//       zip     → in-process (zip crate)
//       tar.gz  → external `tar` through the CommandRunner
//    2. If the scratch dir holds a single top-level directory, that is the
//       payload; otherwise the scratch dir itself is.
//    3. Swap the payload into place (see SwapStrategy).
//
//  The archive is deleted when `install` returns, success or not. On an
//  extraction failure the scratch dir is left for inspection and cleared at
//  the start of the next run.
// ─────────────────────────────────────────────────────────────────────────────

use std::fs::{self, File};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use crate::artifact::ArchiveKind;
use crate::error::{Result, ToolsError};
use crate::runner::{CommandRunner, Invocation};

/// How a freshly extracted payload replaces what is currently installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapStrategy {
    /// Remove the old directory, rename the payload onto the target.
    Replace,
    /// Move the payload to `versioned_dir` and point the `target` symlink at
    /// it. A real directory found at `target` is kept as
    /// `<stem>-<previous><ext>`; if that name is taken, or the previous
    /// version is unknown, it is removed instead.
    Symlink { versioned_dir: PathBuf, previous: Option<String> },
}

pub struct ArchiveInstaller<'r> {
    runner: &'r dyn CommandRunner,
}

impl<'r> ArchiveInstaller<'r> {
    pub fn new(runner: &'r dyn CommandRunner) -> Self {
        Self { runner }
    }

    /// Scratch directory used while extracting for `target`.
    pub fn scratch_dir(target: &Path) -> PathBuf {
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "artifact".into());
        target.with_file_name(format!(".{}.extract", name))
    }

    /// Extract `archive` and install it at `target`. Returns the directory
    /// that now holds the payload (the versioned dir for `Symlink`).
    pub fn install(
        &self,
        archive: &Path,
        kind: ArchiveKind,
        target: &Path,
        swap: &SwapStrategy,
    ) -> Result<PathBuf> {
        let _archive = ArchiveGuard(archive.to_path_buf());

        let scratch = Self::scratch_dir(target);
        if scratch.exists() {
            log::debug!("removing stale scratch dir {}", scratch.display());
            fs::remove_dir_all(&scratch)?;
        }
        fs::create_dir_all(&scratch)?;

        match kind {
            ArchiveKind::Zip     => extract_zip(archive, &scratch)?,
            ArchiveKind::TarGzip => self.extract_tar(archive, &scratch)?,
        }

        let payload = payload_root(&scratch)?;
        let installed = match swap {
            SwapStrategy::Replace => {
                clear_target(target, None)?;
                fs::rename(&payload, target)?;
                target.to_path_buf()
            }
            SwapStrategy::Symlink { versioned_dir, previous } => {
                clear_target(target, previous.as_deref())?;
                if fs::symlink_metadata(versioned_dir).is_ok() {
                    remove_any(versioned_dir)?;
                }
                fs::rename(&payload, versioned_dir)?;
                make_link(&link_value(versioned_dir, target), target)?;
                versioned_dir.clone()
            }
        };

        if scratch.exists() {
            fs::remove_dir_all(&scratch)?;
        }
        log::debug!("installed {} → {}", archive.display(), installed.display());
        Ok(installed)
    }

    fn extract_tar(&self, archive: &Path, scratch: &Path) -> Result<()> {
        let inv = Invocation::new("tar")
            .arg("-xzf")
            .path_arg(archive)
            .arg("-C")
            .path_arg(scratch);
        let out = self.runner.run(&inv)?;
        if !out.success() {
            return Err(ToolsError::ExtractionFailure {
                archive: archive.to_path_buf(),
                scratch: scratch.to_path_buf(),
                reason:  format!("tar exited with status {}: {}", out.code(), out.stderr.trim()),
            });
        }
        Ok(())
    }
}

/// Deletes the archive when dropped.
struct ArchiveGuard(PathBuf);

impl Drop for ArchiveGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.0) {
            if e.kind() != ErrorKind::NotFound {
                log::warn!("could not remove {}: {}", self.0.display(), e);
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
//  Extraction
// ─────────────────────────────────────────────────────────────────────────────

fn extract_zip(archive: &Path, dest: &Path) -> Result<()> {
    let failure = |reason: String| ToolsError::ExtractionFailure {
        archive: archive.to_path_buf(),
        scratch: dest.to_path_buf(),
        reason,
    };

    let mut zip = zip::ZipArchive::new(File::open(archive)?)
        .map_err(|e| failure(format!("cannot open ZIP: {}", e)))?;

    // Symlinks are created after every other entry is on disk. Nothing is
    // written through a link, and a link whose path is already taken by a
    // directory or file is refused.
    #[cfg(unix)]
    let mut links: Vec<(PathBuf, String)> = Vec::new();

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)
            .map_err(|e| failure(format!("ZIP read error: {}", e)))?;

        let rel = match entry.enclosed_name() {
            Some(p) => p.to_path_buf(),
            None => return Err(failure(format!("unsafe entry path '{}'", entry.name()))),
        };
        let out = dest.join(&rel);

        if entry.is_dir() {
            fs::create_dir_all(&out)?;
            continue;
        }
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent)?;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            const S_IFMT: u32 = 0o170000;
            const S_IFLNK: u32 = 0o120000;

            if let Some(mode) = entry.unix_mode() {
                if mode & S_IFMT == S_IFLNK {
                    let mut link_target = String::new();
                    io::Read::read_to_string(&mut entry, &mut link_target)?;
                    if !link_stays_inside(&rel, Path::new(&link_target)) {
                        return Err(failure(format!(
                            "symlink '{}' points outside the archive ({})",
                            entry.name(),
                            link_target
                        )));
                    }
                    links.push((out, link_target));
                    continue;
                }
                let mut f = File::create(&out)?;
                io::copy(&mut entry, &mut f)?;
                fs::set_permissions(&out, fs::Permissions::from_mode(mode & 0o7777))?;
                continue;
            }
        }

        let mut f = File::create(&out)?;
        io::copy(&mut entry, &mut f)?;
    }

    #[cfg(unix)]
    for (link, target) in links {
        if fs::symlink_metadata(&link).is_ok() {
            return Err(failure(format!("symlink '{}' collides with another entry", link.display())));
        }
        std::os::unix::fs::symlink(target, &link)?;
    }
    Ok(())
}

/// Lexically resolves `target` against the directory holding `link` (both
/// relative to the extraction root) and reports whether it stays inside.
#[cfg(unix)]
fn link_stays_inside(link: &Path, target: &Path) -> bool {
    use std::path::Component;

    let mut depth = link.parent()
        .map(|p| p.components().filter(|c| matches!(c, Component::Normal(_))).count())
        .unwrap_or(0);
    for c in target.components() {
        match c {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => match depth.checked_sub(1) {
                Some(d) => depth = d,
                None => return false,
            },
            Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    true
}

/// The single top-level directory inside `scratch`, or `scratch` itself.
fn payload_root(scratch: &Path) -> Result<PathBuf> {
    let entries: Vec<_> = fs::read_dir(scratch)?.collect::<io::Result<_>>()?;
    if let [only] = entries.as_slice() {
        if only.file_type()?.is_dir() {
            return Ok(only.path());
        }
    }
    Ok(scratch.to_path_buf())
}

// ─────────────────────────────────────────────────────────────────────────────
//  Swap helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Make `target` free. Links are unlinked (their destination is left alone),
/// real directories are retired under their previous version when possible.
fn clear_target(target: &Path, previous: Option<&str>) -> Result<()> {
    let meta = match fs::symlink_metadata(target) {
        Ok(m) => m,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    if meta.file_type().is_symlink() {
        remove_link(target)?;
    } else if meta.is_dir() {
        match previous.map(|v| versioned_sibling(target, v)) {
            Some(aside) if fs::symlink_metadata(&aside).is_err() => {
                log::debug!("keeping previous install as {}", aside.display());
                fs::rename(target, &aside)?;
            }
            _ => fs::remove_dir_all(target)?,
        }
    } else {
        fs::remove_file(target)?;
    }
    Ok(())
}

/// `SDK.app` + `13.3.0` → `SDK-13.3.0.app`; `client` + `abc` → `client-abc`.
pub fn versioned_sibling(target: &Path, version: &str) -> PathBuf {
    let stem = target
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let name = match target.extension() {
        Some(ext) => format!("{}-{}.{}", stem, version, ext.to_string_lossy()),
        None => format!("{}-{}", stem, version),
    };
    target.with_file_name(name)
}

/// Relative link when both live in the same directory.
fn link_value(versioned_dir: &Path, link: &Path) -> PathBuf {
    match (versioned_dir.parent(), link.parent(), versioned_dir.file_name()) {
        (Some(a), Some(b), Some(name)) if a == b => PathBuf::from(name),
        _ => versioned_dir.to_path_buf(),
    }
}

fn remove_any(path: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(path)?;
    if meta.file_type().is_symlink() {
        remove_link(path)
    } else if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

fn remove_link(link: &Path) -> io::Result<()> {
    #[cfg(windows)]
    {
        if fs::remove_dir(link).is_ok() {
            return Ok(());
        }
    }
    fs::remove_file(link)
}

fn make_link(original: &Path, link: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        return std::os::unix::fs::symlink(original, link);
    }
    #[cfg(windows)]
    {
        return std::os::windows::fs::symlink_dir(original, link);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::fake::{exit, FakeRunner};
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let mut zw = zip::ZipWriter::new(File::create(path).unwrap());
        let opts = zip::write::FileOptions::default();
        for (name, data) in entries {
            zw.start_file(*name, opts).unwrap();
            zw.write_all(data).unwrap();
        }
        zw.finish().unwrap();
    }

    /// Fake `tar` that drops `files` into the `-C` directory.
    fn tar_writing(files: &'static [(&'static str, &'static str)]) -> FakeRunner {
        FakeRunner::new(move |inv| {
            let pos = inv.args.iter().position(|a| a == "-C").unwrap();
            let dest = PathBuf::from(&inv.args[pos + 1]);
            for (rel, body) in files {
                let p = dest.join(rel);
                fs::create_dir_all(p.parent().unwrap()).unwrap();
                fs::write(p, body).unwrap();
            }
            exit(0)
        })
    }

    #[test]
    fn tar_failure_keeps_scratch_and_deletes_archive() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("bundle.tgz");
        fs::write(&archive, b"not really a tarball").unwrap();
        let target = dir.path().join("client");

        let runner = FakeRunner::exiting(2);
        let result = ArchiveInstaller::new(&runner)
            .install(&archive, ArchiveKind::TarGzip, &target, &SwapStrategy::Replace);

        match result {
            Err(ToolsError::ExtractionFailure { scratch, reason, .. }) => {
                assert_eq!(scratch, dir.path().join(".client.extract"));
                assert!(reason.contains("status 2"));
            }
            other => panic!("expected extraction failure, got {:?}", other),
        }
        assert!(!archive.exists());
        assert!(dir.path().join(".client.extract").is_dir());
        assert!(!target.exists());
    }

    #[test]
    fn tar_invocation_targets_scratch_dir() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("bundle.tgz");
        fs::write(&archive, b"x").unwrap();
        let target = dir.path().join("client");

        let runner = tar_writing(&[("accelerator-linux/accel_ctl", "#!/bin/sh\n")]);
        let installed = ArchiveInstaller::new(&runner)
            .install(&archive, ArchiveKind::TarGzip, &target, &SwapStrategy::Replace)
            .unwrap();

        assert_eq!(installed, target);
        assert!(target.join("accel_ctl").is_file());
        assert!(!ArchiveInstaller::scratch_dir(&target).exists());

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].program, "tar");
        assert_eq!(calls[0].args[0], "-xzf");
        assert_eq!(PathBuf::from(&calls[0].args[3]), ArchiveInstaller::scratch_dir(&target));
    }

    #[test]
    fn zip_replace_flattens_single_root_and_drops_old_files() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("bundle.zip");
        write_zip(&archive, &[("bundle/bin/tool", b"new"), ("bundle/README", b"hi")]);

        let target = dir.path().join("client");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("stale"), b"old").unwrap();

        let runner = FakeRunner::exiting(0);
        ArchiveInstaller::new(&runner)
            .install(&archive, ArchiveKind::Zip, &target, &SwapStrategy::Replace)
            .unwrap();

        assert_eq!(fs::read(target.join("bin/tool")).unwrap(), b"new");
        assert!(target.join("README").is_file());
        assert!(!target.join("stale").exists());
        assert!(!archive.exists());
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn zip_without_single_root_installs_scratch_as_is() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("bundle.zip");
        write_zip(&archive, &[("a.txt", b"a"), ("b/c.txt", b"c")]);
        let target = dir.path().join("client");

        let runner = FakeRunner::exiting(0);
        ArchiveInstaller::new(&runner)
            .install(&archive, ArchiveKind::Zip, &target, &SwapStrategy::Replace)
            .unwrap();

        assert!(target.join("a.txt").is_file());
        assert!(target.join("b/c.txt").is_file());
    }

    #[test]
    fn corrupt_zip_is_an_extraction_failure() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("bundle.zip");
        fs::write(&archive, b"PK garbage").unwrap();
        let target = dir.path().join("client");

        let runner = FakeRunner::exiting(0);
        let result = ArchiveInstaller::new(&runner)
            .install(&archive, ArchiveKind::Zip, &target, &SwapStrategy::Replace);

        assert!(matches!(result, Err(ToolsError::ExtractionFailure { .. })));
        assert!(!archive.exists());
    }

    #[test]
    fn stale_scratch_from_previous_run_is_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("client");
        let scratch = ArchiveInstaller::scratch_dir(&target);
        fs::create_dir_all(scratch.join("leftover")).unwrap();

        let archive = dir.path().join("bundle.zip");
        write_zip(&archive, &[("bundle/tool", b"x")]);

        let runner = FakeRunner::exiting(0);
        ArchiveInstaller::new(&runner)
            .install(&archive, ArchiveKind::Zip, &target, &SwapStrategy::Replace)
            .unwrap();

        assert!(target.join("tool").is_file());
        assert!(!target.join("leftover").exists());
    }

    #[cfg(unix)]
    #[test]
    fn symlink_swap_repoints_link_without_touching_old_target() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("SDK-13.3.0.app");
        fs::create_dir_all(&old).unwrap();
        fs::write(old.join("marker"), b"13").unwrap();
        let link = dir.path().join("SDK.app");
        std::os::unix::fs::symlink("SDK-13.3.0.app", &link).unwrap();

        let archive = dir.path().join("sdk.zip");
        write_zip(&archive, &[("SDK.app/marker", b"14")]);

        let versioned = dir.path().join("SDK-14.3.1.app");
        let runner = FakeRunner::exiting(0);
        let swap = SwapStrategy::Symlink { versioned_dir: versioned.clone(), previous: Some("13.3.0".into()) };
        let installed = ArchiveInstaller::new(&runner)
            .install(&archive, ArchiveKind::Zip, &link, &swap)
            .unwrap();

        assert_eq!(installed, versioned);
        assert_eq!(fs::read_link(&link).unwrap(), PathBuf::from("SDK-14.3.1.app"));
        assert_eq!(fs::read(link.join("marker")).unwrap(), b"14");
        assert_eq!(fs::read(old.join("marker")).unwrap(), b"13");
    }

    #[cfg(unix)]
    #[test]
    fn symlink_swap_retires_legacy_real_directory() {
        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("SDK.app");
        fs::create_dir_all(&link).unwrap();
        fs::write(link.join("marker"), b"12").unwrap();

        let archive = dir.path().join("sdk.zip");
        write_zip(&archive, &[("SDK.app/marker", b"14")]);

        let versioned = dir.path().join("SDK-14.3.1.app");
        let runner = FakeRunner::exiting(0);
        let swap = SwapStrategy::Symlink { versioned_dir: versioned, previous: Some("12.4.0".into()) };
        ArchiveInstaller::new(&runner)
            .install(&archive, ArchiveKind::Zip, &link, &swap)
            .unwrap();

        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(fs::read(dir.path().join("SDK-12.4.0.app/marker")).unwrap(), b"12");
    }

    #[cfg(unix)]
    #[test]
    fn symlink_swap_removes_legacy_directory_when_aside_name_taken() {
        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("SDK.app");
        fs::create_dir_all(&link).unwrap();
        fs::write(link.join("stale"), b"13").unwrap();
        let aside = dir.path().join("SDK-13.3.0.app");
        fs::create_dir_all(&aside).unwrap();
        fs::write(aside.join("kept"), b"13").unwrap();

        let archive = dir.path().join("sdk.zip");
        write_zip(&archive, &[("SDK.app/new", b"14")]);

        let versioned = dir.path().join("SDK-14.3.1.app");
        let runner = FakeRunner::exiting(0);
        let swap = SwapStrategy::Symlink { versioned_dir: versioned, previous: Some("13.3.0".into()) };
        ArchiveInstaller::new(&runner)
            .install(&archive, ArchiveKind::Zip, &link, &swap)
            .unwrap();

        assert!(link.join("new").is_file());
        assert!(aside.join("kept").is_file());
        assert!(!aside.join("stale").exists());
    }

    #[cfg(unix)]
    #[test]
    fn zip_symlink_leaving_scratch_is_rejected() {
        use zip::write::FileOptions;

        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("bundle.zip");
        let mut zw = zip::ZipWriter::new(File::create(&archive).unwrap());
        zw.add_symlink("bundle/link", "../../elsewhere", FileOptions::default()).unwrap();
        zw.start_file("bundle/link/owned", FileOptions::default()).unwrap();
        zw.write_all(b"pwned").unwrap();
        zw.finish().unwrap();

        let target = dir.path().join("client");
        let runner = FakeRunner::exiting(0);
        let result = ArchiveInstaller::new(&runner)
            .install(&archive, ArchiveKind::Zip, &target, &SwapStrategy::Replace);

        match result {
            Err(ToolsError::ExtractionFailure { reason, .. }) => assert!(reason.contains("bundle/link")),
            other => panic!("expected extraction failure, got {:?}", other),
        }
        assert!(!dir.path().join("elsewhere").exists());
        assert!(!target.exists());
    }

    #[cfg(unix)]
    #[test]
    fn zip_symlink_colliding_with_extracted_entry_is_rejected() {
        use zip::write::FileOptions;

        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("bundle.zip");
        let mut zw = zip::ZipWriter::new(File::create(&archive).unwrap());
        zw.add_symlink("bundle/here", ".", FileOptions::default()).unwrap();
        zw.add_symlink("bundle/here/up", "../..", FileOptions::default()).unwrap();
        zw.finish().unwrap();

        let target = dir.path().join("client");
        let runner = FakeRunner::exiting(0);
        let result = ArchiveInstaller::new(&runner)
            .install(&archive, ArchiveKind::Zip, &target, &SwapStrategy::Replace);

        assert!(matches!(result, Err(ToolsError::ExtractionFailure { .. })));
        assert!(!target.exists());
    }

    #[cfg(unix)]
    #[test]
    fn zip_keeps_in_tree_symlinks_and_unix_modes() {
        use std::os::unix::fs::PermissionsExt;
        use zip::write::FileOptions;

        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("bundle.zip");
        let mut zw = zip::ZipWriter::new(File::create(&archive).unwrap());
        zw.add_symlink("bundle/current", "bin", FileOptions::default()).unwrap();
        zw.start_file("bundle/bin/tool", FileOptions::default().unix_permissions(0o755)).unwrap();
        zw.write_all(b"#!/bin/sh\n").unwrap();
        zw.finish().unwrap();

        let target = dir.path().join("client");
        let runner = FakeRunner::exiting(0);
        ArchiveInstaller::new(&runner)
            .install(&archive, ArchiveKind::Zip, &target, &SwapStrategy::Replace)
            .unwrap();

        assert_eq!(fs::read_link(target.join("current")).unwrap(), PathBuf::from("bin"));
        assert_eq!(fs::read(target.join("current/tool")).unwrap(), b"#!/bin/sh\n");
        let mode = fs::metadata(target.join("bin/tool")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[cfg(unix)]
    #[test]
    fn link_containment_is_checked_lexically() {
        assert!(link_stays_inside(Path::new("bundle/current"), Path::new("bin")));
        assert!(link_stays_inside(Path::new("bundle/lib/a.so"), Path::new("../bin/b.so")));
        assert!(!link_stays_inside(Path::new("bundle/link"), Path::new("../../x")));
        assert!(!link_stays_inside(Path::new("bundle/link"), Path::new("/etc")));
    }

    #[test]
    fn versioned_sibling_keeps_extension() {
        assert_eq!(versioned_sibling(Path::new("/x/SDK.app"), "13.3.0"), PathBuf::from("/x/SDK-13.3.0.app"));
        assert_eq!(versioned_sibling(Path::new("/x/client"), "abc"), PathBuf::from("/x/client-abc"));
    }
}

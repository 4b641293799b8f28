//! Archive extraction for daemon releases
//!
//! Unpacks zip and gzip-tar archives into the library directory, keeping the
//! archive's directory layout. Existing files are overwritten.

use super::error::InstallError;
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};

/// Archive formats the installer can unpack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    TarGz,
}

impl ArchiveKind {
    /// Determine archive kind from the file name's extension
    pub fn from_file_name(name: &str) -> Option<Self> {
        let name = name.to_lowercase();
        if name.ends_with(".zip") {
            Some(ArchiveKind::Zip)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") || name.ends_with(".gz") {
            Some(ArchiveKind::TarGz)
        } else {
            None
        }
    }
}

/// Extract `archive_path` into `dest_dir`
///
/// Returns the number of regular files written. Blocking; run it on a
/// blocking thread from async code.
pub fn extract_archive(
    archive_path: &Path,
    kind: ArchiveKind,
    dest_dir: &Path,
) -> Result<usize, InstallError> {
    log::info!(
        "Extracting {} into {}",
        archive_path.display(),
        dest_dir.display()
    );

    fs::create_dir_all(dest_dir)
        .map_err(|e| InstallError::ExtractFailed(format!("create {}: {}", dest_dir.display(), e)))?;

    let written = match kind {
        ArchiveKind::Zip => extract_zip(archive_path, dest_dir)?,
        ArchiveKind::TarGz => extract_tar_gz(archive_path, dest_dir)?,
    };

    log::info!("Extracted {} files into {}", written, dest_dir.display());
    Ok(written)
}

/// Extract every entry of a ZIP archive
fn extract_zip(archive_path: &Path, dest_dir: &Path) -> Result<usize, InstallError> {
    let file = File::open(archive_path).map_err(|e| extract_err("open archive", e))?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| extract_err("read zip", e))?;

    let mut written = 0;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| extract_err("read zip entry", e))?;

        let relative = entry.enclosed_name().ok_or_else(|| {
            InstallError::ExtractFailed(format!("unsafe path in archive: {}", entry.name()))
        })?;
        let target = dest_dir.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&target).map_err(|e| extract_err("create directory", e))?;
            continue;
        }

        write_entry(&mut entry, &target)?;
        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            set_mode(&target, mode)?;
        }
        written += 1;
    }

    Ok(written)
}

/// Extract directories and regular files of a tar.gz archive
///
/// Links and other special entries are skipped.
fn extract_tar_gz(archive_path: &Path, dest_dir: &Path) -> Result<usize, InstallError> {
    let file = File::open(archive_path).map_err(|e| extract_err("open archive", e))?;
    let gz = flate2::read::GzDecoder::new(file);
    let mut archive = tar::Archive::new(gz);

    let entries = archive.entries().map_err(|e| extract_err("read tar", e))?;

    let mut written = 0;
    for entry in entries {
        let mut entry = entry.map_err(|e| extract_err("read tar entry", e))?;

        let entry_type = entry.header().entry_type();
        if !entry_type.is_dir() && !entry_type.is_file() {
            continue;
        }

        let path = entry.path().map_err(|e| extract_err("read entry path", e))?;
        let relative = sanitize_relative(&path).ok_or_else(|| {
            InstallError::ExtractFailed(format!("unsafe path in archive: {}", path.display()))
        })?;
        let target = dest_dir.join(relative);

        if entry_type.is_dir() {
            fs::create_dir_all(&target).map_err(|e| extract_err("create directory", e))?;
            continue;
        }

        #[cfg(unix)]
        let mode = entry.header().mode().ok();

        write_entry(&mut entry, &target)?;
        #[cfg(unix)]
        if let Some(mode) = mode {
            set_mode(&target, mode)?;
        }
        written += 1;
    }

    Ok(written)
}

/// Write one regular file, creating parent directories and truncating any existing file
fn write_entry(reader: &mut impl io::Read, target: &Path) -> Result<(), InstallError> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| extract_err("create directory", e))?;
    }

    let mut outfile = File::create(target).map_err(|e| extract_err("create file", e))?;
    io::copy(reader, &mut outfile).map_err(|e| extract_err("write file", e))?;
    Ok(())
}

#[cfg(unix)]
fn set_mode(target: &Path, mode: u32) -> Result<(), InstallError> {
    use std::os::unix::fs::PermissionsExt;

    // Keep the rwx bits only; setuid and friends are never restored
    fs::set_permissions(target, fs::Permissions::from_mode(mode & 0o777))
        .map_err(|e| extract_err("set permissions", e))
}

/// Strip `.` components and reject anything that would leave the destination
fn sanitize_relative(path: &Path) -> Option<PathBuf> {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if clean.as_os_str().is_empty() {
        None
    } else {
        Some(clean)
    }
}

fn extract_err(context: &str, e: impl std::fmt::Display) -> InstallError {
    InstallError::ExtractFailed(format!("{}: {}", context, e))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_kind_from_name() {
        assert_eq!(ArchiveKind::from_file_name("coind-win64.zip"), Some(ArchiveKind::Zip));
        assert_eq!(ArchiveKind::from_file_name("coind-osx64.tar.gz"), Some(ArchiveKind::TarGz));
        assert_eq!(ArchiveKind::from_file_name("coind.TGZ"), Some(ArchiveKind::TarGz));
        assert_eq!(ArchiveKind::from_file_name("coind-setup.exe"), None);
        assert_eq!(ArchiveKind::from_file_name("coind.dmg"), None);
    }

    #[test]
    fn test_extract_zip_preserves_layout() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("coind.zip");
        fs::write(&archive, fixtures::daemon_zip()).unwrap();
        let dest = dir.path().join("lib");

        let written = extract_archive(&archive, ArchiveKind::Zip, &dest).unwrap();

        assert_eq!(written, 2);
        assert!(dest.join("bin/coind").is_file());
        assert!(dest.join("share/man/coind.1").is_file());
        assert!(dest.join("share/doc").is_dir());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(dest.join("bin/coind")).unwrap().permissions().mode();
            assert_eq!(mode & 0o111, 0o111);
        }
    }

    #[test]
    fn test_extract_tar_gz_skips_links() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("coind.tar.gz");
        fs::write(&archive, fixtures::daemon_tar_gz()).unwrap();
        let dest = dir.path().join("lib");

        let written = extract_archive(&archive, ArchiveKind::TarGz, &dest).unwrap();

        assert_eq!(written, 1);
        assert!(dest.join("coind-5.2.0/bin/coind").is_file());
        assert!(!dest.join("coind-5.2.0/bin/coind-link").exists());
    }

    #[test]
    fn test_extract_overwrites_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("coind.zip");
        fs::write(&archive, fixtures::daemon_zip()).unwrap();
        let dest = dir.path().join("lib");
        fs::create_dir_all(dest.join("bin")).unwrap();
        fs::write(dest.join("bin/coind"), b"stale binary with a much longer body").unwrap();

        extract_archive(&archive, ArchiveKind::Zip, &dest).unwrap();

        assert_eq!(fs::read(dest.join("bin/coind")).unwrap(), b"#!/bin/sh\nexit 0\n");
    }

    #[test]
    fn test_corrupt_zip_fails() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("broken.zip");
        fs::write(&archive, b"PK definitely not a zip").unwrap();

        let err = extract_archive(&archive, ArchiveKind::Zip, &dir.path().join("lib")).unwrap_err();
        assert!(matches!(err, InstallError::ExtractFailed(_)));
    }

    #[test]
    fn test_sanitize_relative() {
        assert_eq!(
            sanitize_relative(Path::new("./coind/bin/coind")),
            Some(PathBuf::from("coind/bin/coind"))
        );
        assert_eq!(sanitize_relative(Path::new("../etc/passwd")), None);
        assert_eq!(sanitize_relative(Path::new("/etc/passwd")), None);
        assert_eq!(sanitize_relative(Path::new(".")), None);
    }
}

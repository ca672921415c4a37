//! Artifact writer for the per-device backup tree.
//!
//! Layout: `<root>/<device>/<device>_<YYYYMMDD_HHMMSS>[_info].txt`. Files are
//! created exclusively and never rewritten; the retention sweeper is the only
//! thing that removes them.

use std::io::{self, Write};

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::fs::OpenOptions;
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;
use tracing::warn;

/// Mode applied to backup directories.
pub const DIRECTORY_MODE: u32 = 0o755;

/// Mode applied to artifact files.
pub const FILE_MODE: u32 = 0o644;

/// Errors raised while writing artifacts.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ArtifactError {
    /// Raised when a filesystem operation fails.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path being accessed.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
    /// Raised when the target artifact already exists.
    #[error("artifact {path} already exists")]
    AlreadyExists {
        /// Existing artifact path.
        path: Utf8PathBuf,
    },
}

/// What an artifact holds.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ArtifactKind {
    /// Exported running configuration.
    Config,
    /// Diagnostic command output.
    SystemInfo,
}

impl ArtifactKind {
    /// File name for `device` captured at `stamp`.
    #[must_use]
    pub fn file_name(self, device: &str, stamp: &str) -> String {
        match self {
            Self::Config => format!("{device}_{stamp}.txt"),
            Self::SystemInfo => format!("{device}_{stamp}_info.txt"),
        }
    }
}

/// Writes artifacts beneath a backup root.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ArtifactWriter {
    root: Utf8PathBuf,
}

impl ArtifactWriter {
    /// Creates a writer rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Backup root directory.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Creates the backup root if needed. Permission tightening is
    /// best-effort and only logged on failure.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::Io`] when the directory cannot be created.
    pub fn ensure_root(&self) -> Result<(), ArtifactError> {
        ensure_directory(&self.root)
    }

    /// Creates `<root>/<device>` if needed and applies [`DIRECTORY_MODE`].
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::Io`] when the directory cannot be created.
    pub fn ensure_device_dir(&self, device: &str) -> Result<Utf8PathBuf, ArtifactError> {
        let path = self.root.join(device);
        ensure_directory(&path)?;
        Ok(path)
    }

    /// Writes `contents` as a new artifact and returns its file name.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::AlreadyExists`] if the name is taken, or
    /// [`ArtifactError::Io`] when the file cannot be written.
    pub fn write(
        &self,
        device: &str,
        kind: ArtifactKind,
        stamp: &str,
        contents: &str,
    ) -> Result<String, ArtifactError> {
        let file_name = kind.file_name(device, stamp);
        let path = self.root.join(device).join(&file_name);
        let dir = open_dir(&self.root.join(device))?;

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        let mut file = dir.open_with(&file_name, &options).map_err(|err| {
            if err.kind() == io::ErrorKind::AlreadyExists {
                ArtifactError::AlreadyExists { path: path.clone() }
            } else {
                io_error(&path, &err)
            }
        })?;
        file.write_all(contents.as_bytes())
            .and_then(|()| file.flush())
            .map_err(|err| io_error(&path, &err))?;

        if let Err(err) = set_mode(&dir, &file_name, FILE_MODE) {
            warn!(path = %path, error = %err, "could not set artifact permissions");
        }
        Ok(file_name)
    }
}

fn ensure_directory(path: &Utf8Path) -> Result<(), ArtifactError> {
    Dir::create_ambient_dir_all(path, ambient_authority()).map_err(|err| io_error(path, &err))?;

    let (parent, name) = split_parent(path);
    let result = open_dir(parent).and_then(|dir| {
        set_mode(&dir, name, DIRECTORY_MODE).map_err(|err| io_error(path, &err))
    });
    if let Err(err) = result {
        warn!(path = %path, error = %err, "could not set directory permissions");
    }
    Ok(())
}

fn split_parent(path: &Utf8Path) -> (&Utf8Path, &str) {
    let parent = match path.parent() {
        Some(dir) if !dir.as_str().is_empty() => dir,
        _ => Utf8Path::new("."),
    };
    (parent, path.file_name().unwrap_or("."))
}

fn open_dir(path: &Utf8Path) -> Result<Dir, ArtifactError> {
    Dir::open_ambient_dir(path, ambient_authority()).map_err(|err| io_error(path, &err))
}

fn io_error(path: &Utf8Path, err: &io::Error) -> ArtifactError {
    ArtifactError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

#[cfg(unix)]
pub(crate) fn set_mode(dir: &Dir, name: &str, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let permissions = cap_std::fs::Permissions::from_std(std::fs::Permissions::from_mode(mode));
    dir.set_permissions(name, permissions)
}

#[cfg(not(unix))]
pub(crate) fn set_mode(_dir: &Dir, _name: &str, _mode: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    struct WriterFixture {
        _tmp: TempDir,
        root: Utf8PathBuf,
        writer: ArtifactWriter,
    }

    #[fixture]
    fn writer_fixture() -> WriterFixture {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let root = Utf8PathBuf::from_path_buf(tmp.path().join("backups"))
            .unwrap_or_else(|path| panic!("temp path should be utf8: {}", path.display()));
        let writer = ArtifactWriter::new(root.clone());
        WriterFixture {
            _tmp: tmp,
            root,
            writer,
        }
    }

    #[rstest]
    #[case(ArtifactKind::Config, "sw1_20240101_020000.txt")]
    #[case(ArtifactKind::SystemInfo, "sw1_20240101_020000_info.txt")]
    fn file_names_follow_layout(#[case] kind: ArtifactKind, #[case] expected: &str) {
        assert_eq!(kind.file_name("sw1", "20240101_020000"), expected);
    }

    #[rstest]
    fn write_creates_file_under_device_directory(writer_fixture: WriterFixture) {
        let WriterFixture { root, writer, .. } = writer_fixture;
        writer.ensure_device_dir("sw1").expect("device dir");

        let name = writer
            .write("sw1", ArtifactKind::Config, "20240101_020000", "hostname sw1\n")
            .expect("write artifact");

        let contents =
            std::fs::read_to_string(root.join("sw1").join(&name)).expect("read artifact");
        assert_eq!(name, "sw1_20240101_020000.txt");
        assert_eq!(contents, "hostname sw1\n");
    }

    #[rstest]
    fn write_refuses_to_overwrite_existing_artifact(writer_fixture: WriterFixture) {
        let WriterFixture { root, writer, .. } = writer_fixture;
        writer.ensure_device_dir("sw1").expect("device dir");
        writer
            .write("sw1", ArtifactKind::Config, "20240101_020000", "first")
            .expect("first write");

        let err = writer
            .write("sw1", ArtifactKind::Config, "20240101_020000", "second")
            .expect_err("second write should fail");

        assert!(matches!(err, ArtifactError::AlreadyExists { .. }), "{err:?}");
        let contents = std::fs::read_to_string(root.join("sw1/sw1_20240101_020000.txt"))
            .expect("read artifact");
        assert_eq!(contents, "first");
    }

    #[rstest]
    fn ensure_device_dir_is_idempotent(writer_fixture: WriterFixture) {
        let WriterFixture { root, writer, .. } = writer_fixture;
        writer.ensure_device_dir("sw1").expect("first create");
        writer.ensure_device_dir("sw1").expect("second create");
        assert!(root.join("sw1").is_dir());
    }

    #[cfg(unix)]
    #[rstest]
    fn permissions_are_applied(writer_fixture: WriterFixture) {
        use std::os::unix::fs::PermissionsExt;

        let WriterFixture { root, writer, .. } = writer_fixture;
        writer.ensure_device_dir("sw1").expect("device dir");
        let name = writer
            .write("sw1", ArtifactKind::SystemInfo, "20240101_020000", "info")
            .expect("write");

        let dir_mode = std::fs::metadata(root.join("sw1"))
            .expect("dir metadata")
            .permissions()
            .mode();
        let file_mode = std::fs::metadata(root.join("sw1").join(name))
            .expect("file metadata")
            .permissions()
            .mode();
        assert_eq!(dir_mode & 0o777, DIRECTORY_MODE);
        assert_eq!(file_mode & 0o777, FILE_MODE);
    }
}

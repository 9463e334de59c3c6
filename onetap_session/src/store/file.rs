//! A storage area kept in a directory on the local filesystem

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use tempfile::NamedTempFile;

use super::{Storage, StorageError};

/// A storage area holding one file per key
///
/// Each write goes to its own temporary file, which is then renamed into
/// place, so a reader never sees a partial value and concurrent writers never
/// share a staging file. On Unix the files are readable only by their owner.
///
/// Other processes sharing the directory see the stored value on their next
/// read, but are not notified of the change.
#[derive(Debug)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Uses `dir` as the storage area, creating it if necessary
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// The directory holding the stored values
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && key
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'));

        if valid {
            Ok(self.dir.join(key))
        } else {
            Err(StorageError::InvalidKey(key.to_owned()))
        }
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.path(key)?) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path(key)?;

        let mut staging = NamedTempFile::new_in(&self.dir)?;
        staging.write_all(value.as_bytes())?;
        staging.as_file().sync_all()?;
        staging.persist(&path).map_err(|err| err.error)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path(key)?) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use color_eyre::Result;

    #[test]
    fn values_survive_reopening() -> Result<()> {
        let dir = tempfile::tempdir()?;

        let storage = FileStorage::new(dir.path())?;
        assert_eq!(storage.get("google-one-tap-token")?, None);
        storage.set("google-one-tap-token", "a.b.c")?;

        let reopened = FileStorage::new(dir.path())?;
        assert_eq!(reopened.get("google-one-tap-token")?.as_deref(), Some("a.b.c"));

        reopened.remove("google-one-tap-token")?;
        reopened.remove("google-one-tap-token")?;
        assert_eq!(storage.get("google-one-tap-token")?, None);
        Ok(())
    }

    #[test]
    fn path_like_keys_are_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let storage = FileStorage::new(dir.path())?;

        for key in ["", "../escape", "nested/key", ".hidden"] {
            assert!(
                matches!(storage.set(key, "x"), Err(StorageError::InvalidKey(_))),
                "{key:?}"
            );
        }
        Ok(())
    }

    #[test]
    fn concurrent_writers_all_succeed() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let storage = std::sync::Arc::new(FileStorage::new(dir.path())?);

        for round in 0..50 {
            let writers: Vec<_> = ["first", "second"]
                .into_iter()
                .map(|writer| {
                    let storage = std::sync::Arc::clone(&storage);
                    std::thread::spawn(move || {
                        storage.set("token", &format!("{writer}-{round}"))
                    })
                })
                .collect();

            for writer in writers {
                writer.join().expect("writer thread panicked")?;
            }

            let stored = storage.get("token")?;
            assert!(
                stored == Some(format!("first-{round}"))
                    || stored == Some(format!("second-{round}")),
                "round {round}: {stored:?}"
            );
        }

        let leftovers = fs::read_dir(dir.path())?.count();
        assert_eq!(leftovers, 1);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn values_are_private_to_the_owner() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir()?;
        let storage = FileStorage::new(dir.path())?;
        storage.set("token", "secret")?;

        let mode = fs::metadata(dir.path().join("token"))?.permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        Ok(())
    }
}

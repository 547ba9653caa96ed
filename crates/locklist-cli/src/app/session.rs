//! The identity saved between runs.
//!
//! Only the uid is stored; the key lives in the key cache.

use std::path::PathBuf;

use locklist_core::types::Identity;

pub struct SessionFile {
    path: PathBuf,
}

impl SessionFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn read(&self) -> anyhow::Result<Option<Identity>> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(anyhow::anyhow!(
                    "Failed to read session {}: {}",
                    self.path.display(),
                    err
                ))
            }
        };
        match serde_json::from_str::<Identity>(&contents) {
            Ok(identity) if !identity.uid.trim().is_empty() => Ok(Some(identity)),
            Ok(_) => Ok(None),
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "ignoring unreadable session file");
                Ok(None)
            }
        }
    }

    pub fn write(&self, identity: &Identity) -> anyhow::Result<()> {
        let contents = serde_json::to_vec_pretty(identity)?;
        locklist_core::fs::write_atomic(&self.path, &contents)
            .map_err(|e| anyhow::anyhow!("Failed to write session {}: {}", self.path.display(), e))
    }

    pub fn clear(&self) -> anyhow::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(anyhow::anyhow!(
                "Failed to remove session {}: {}",
                self.path.display(),
                err
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_means_signed_out() {
        let dir = tempfile::tempdir().expect("tempdir should succeed");
        let session = SessionFile::new(dir.path().join("session.json"));
        assert!(session.read().expect("read should succeed").is_none());
        session.clear().expect("clearing a missing file should succeed");
    }

    #[test]
    fn test_write_read_clear() {
        let dir = tempfile::tempdir().expect("tempdir should succeed");
        let path = dir.path().join("state").join("session.json");
        let session = SessionFile::new(path.clone());

        session
            .write(&Identity::new("alice"))
            .expect("write should succeed");
        assert_eq!(
            session.read().expect("read should succeed"),
            Some(Identity::new("alice"))
        );

        session.clear().expect("clear should succeed");
        assert!(!path.exists());
    }

    #[test]
    fn test_garbage_is_ignored() {
        let dir = tempfile::tempdir().expect("tempdir should succeed");
        let path = dir.path().join("session.json");
        std::fs::write(&path, "not json").expect("write should succeed");
        assert!(SessionFile::new(path).read().expect("read should succeed").is_none());
    }
}

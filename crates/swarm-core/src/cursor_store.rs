//! Persisted reader offsets, one small file per agent.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use swarm_proto::AgentId;
use tracing::{debug, warn};

/// Stores each agent's consumed log offset as `<dir>/<agent>.offset`.
#[derive(Debug, Clone)]
pub struct CursorStore {
    dir: PathBuf,
}

impl CursorStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, agent: &AgentId) -> PathBuf {
        self.dir.join(format!("{agent}.offset"))
    }

    /// Loads the saved offset. A missing or unreadable record means "no offset".
    pub fn load(&self, agent: &AgentId) -> io::Result<Option<u64>> {
        let path = self.path_for(agent);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        match content.trim().parse::<u64>() {
            Ok(offset) => {
                debug!(agent = %agent, offset, "Restored cursor offset");
                Ok(Some(offset))
            }
            Err(e) => {
                warn!(agent = %agent, path = %path.display(), error = %e, "Ignoring corrupt cursor file");
                Ok(None)
            }
        }
    }

    /// Saves the offset, replacing the previous record atomically.
    pub fn save(&self, agent: &AgentId, offset: u64) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(agent);
        let tmp = path.with_extension("offset.tmp");
        fs::write(&tmp, format!("{offset}\n"))?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = CursorStore::new(dir.path().join("cursors"));
        let agent = AgentId::new("roberts");

        assert_eq!(store.load(&agent).unwrap(), None);
        store.save(&agent, 4096).unwrap();
        assert_eq!(store.load(&agent).unwrap(), Some(4096));

        store.save(&agent, 8192).unwrap();
        assert_eq!(store.load(&agent).unwrap(), Some(8192));
        assert!(store.path_for(&agent).ends_with("roberts.offset"));
    }

    #[test]
    fn test_corrupt_file_is_ignored() {
        let dir = TempDir::new().unwrap();
        let store = CursorStore::new(dir.path());
        let agent = AgentId::new("scrum");
        fs::write(store.path_for(&agent), "not-a-number").unwrap();
        assert_eq!(store.load(&agent).unwrap(), None);
    }
}

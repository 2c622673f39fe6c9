//! State documents as files: `<dir>/<item-id>.state`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;
use uuid::Uuid;

use super::StateStore;
use crate::error::Result;

const EXTENSION: &str = "state";

pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    /// Use `dir` for state documents, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, item_id: Uuid) -> PathBuf {
        self.dir.join(format!("{item_id}.{EXTENSION}"))
    }

    /// Item ids with a stored document. Files that don't look like state
    /// documents are ignored.
    pub fn list_items(&self) -> Result<Vec<Uuid>> {
        let mut items = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if !path.extension().is_some_and(|ext| ext == EXTENSION) {
                continue;
            }
            if let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| Uuid::parse_str(s).ok())
            {
                items.push(id);
            }
        }
        items.sort();
        Ok(items)
    }
}

impl StateStore for FileStateStore {
    fn size(&self, item_id: Uuid) -> Result<Option<u64>> {
        match std::fs::metadata(self.path_for(item_id)) {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn read(&self, item_id: Uuid) -> Result<Vec<u8>> {
        Ok(std::fs::read(self.path_for(item_id))?)
    }

    fn write(&self, item_id: Uuid, data: &[u8]) -> Result<()> {
        let path = self.path_for(item_id);
        std::fs::write(&path, data)?;
        debug!(path = %path.display(), bytes = data.len(), "state written");
        Ok(())
    }

    fn exists(&self, item_id: Uuid) -> bool {
        self.path_for(item_id).exists()
    }

    fn remove(&self, item_id: Uuid) -> Result<()> {
        std::fs::remove_file(self.path_for(item_id))?;
        Ok(())
    }
}

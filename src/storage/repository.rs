use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

const EXTENSION: &str = "obf";
const CACHE_DIR: &str = "cache";

#[derive(thiserror::Error, Debug)]
pub enum RepositoryError {
    #[error("repository I/O error on {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("resource {0} not found")]
    NotFound(Uuid),
}

impl RepositoryError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceInfo {
    pub id: Uuid,
    pub path: PathBuf,
    pub size: u64,
    /// Whether the resource has been moved to cold storage.
    pub cached: bool,
}

/// Storage location for recordings.
pub trait Repository: Send + Sync {
    /// Reserve an id and the path its resource should be written to. The
    /// file itself is not created.
    fn new_resource_id(&self) -> Result<(Uuid, PathBuf), RepositoryError>;

    fn lookup(&self, id: Uuid) -> Result<PathBuf, RepositoryError>;

    /// Move a resource to cold storage.
    fn cache(&self, id: Uuid) -> Result<(), RepositoryError>;

    fn list(&self) -> Result<Vec<ResourceInfo>, RepositoryError>;
}

/// Repository over a directory: `<root>/<uuid>.obf`, cached resources under
/// `<root>/cache/`.
pub struct FsRepository {
    root: PathBuf,
}

impl FsRepository {
    /// Creates the root and cache directories if they don't exist
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, RepositoryError> {
        let root = root.into();
        let cache = root.join(CACHE_DIR);
        fs::create_dir_all(&cache).map_err(|err| RepositoryError::io(&cache, err))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn hot_path(&self, id: Uuid) -> PathBuf {
        self.root.join(format!("{}.{}", id, EXTENSION))
    }

    fn cold_path(&self, id: Uuid) -> PathBuf {
        self.root.join(CACHE_DIR).join(format!("{}.{}", id, EXTENSION))
    }

    fn scan(&self, dir: &Path, cached: bool, out: &mut Vec<ResourceInfo>) -> Result<(), RepositoryError> {
        let entries = fs::read_dir(dir).map_err(|err| RepositoryError::io(dir, err))?;
        for entry in entries {
            let entry = entry.map_err(|err| RepositoryError::io(dir, err))?;
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some(EXTENSION) {
                continue;
            }
            // Foreign files with the extension are skipped.
            let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| Uuid::parse_str(s).ok())
            else {
                continue;
            };
            let metadata = entry.metadata().map_err(|err| RepositoryError::io(&path, err))?;
            if !metadata.is_file() {
                continue;
            }
            out.push(ResourceInfo {
                id,
                path,
                size: metadata.len(),
                cached,
            });
        }
        Ok(())
    }
}

impl Repository for FsRepository {
    fn new_resource_id(&self) -> Result<(Uuid, PathBuf), RepositoryError> {
        let id = Uuid::new_v4();
        Ok((id, self.hot_path(id)))
    }

    fn lookup(&self, id: Uuid) -> Result<PathBuf, RepositoryError> {
        [self.hot_path(id), self.cold_path(id)]
            .into_iter()
            .find(|path| path.is_file())
            .ok_or(RepositoryError::NotFound(id))
    }

    fn cache(&self, id: Uuid) -> Result<(), RepositoryError> {
        let hot = self.hot_path(id);
        if !hot.is_file() {
            return if self.cold_path(id).is_file() {
                Ok(())
            } else {
                Err(RepositoryError::NotFound(id))
            };
        }
        let cold = self.cold_path(id);
        fs::rename(&hot, &cold).map_err(|err| RepositoryError::io(&hot, err))?;
        debug!(resource = %id, "moved to cache");
        Ok(())
    }

    fn list(&self) -> Result<Vec<ResourceInfo>, RepositoryError> {
        let mut resources = Vec::new();
        self.scan(&self.root, false, &mut resources)?;
        self.scan(&self.root.join(CACHE_DIR), true, &mut resources)?;
        resources.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(resources)
    }
}

//! Named text blobs the operator can read and edit.

use crate::error::{Result, ServerError};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn list(&self) -> Result<Vec<String>>;
    async fn read(&self, name: &str) -> Result<String>;
    async fn write(&self, name: &str, contents: &str) -> Result<()>;
}

pub async fn read_json<T: DeserializeOwned>(store: &dyn ConfigStore, name: &str) -> Result<T> {
    let raw = store.read(name).await?;
    Ok(serde_json::from_str(&raw)?)
}

pub async fn write_json<T: Serialize + Sync>(
    store: &dyn ConfigStore,
    name: &str,
    value: &T,
) -> Result<()> {
    let raw = serde_json::to_string_pretty(value)?;
    store.write(name, &raw).await
}

/// Blob store backed by the files of one directory.
pub struct DirConfigStore {
    dir: PathBuf,
}

impl DirConfigStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_of(&self, name: &str) -> Result<PathBuf> {
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.dir.join(name)),
            _ => Err(ServerError::InvalidConfigName(name.to_string())),
        }
    }
}

#[async_trait]
impl ConfigStore for DirConfigStore {
    async fn list(&self) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ServerError::io(&self.dir, e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ServerError::io(&self.dir, e))?
        {
            let is_file = entry
                .file_type()
                .await
                .map(|kind| kind.is_file())
                .unwrap_or(false);
            if is_file {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn read(&self, name: &str) -> Result<String> {
        let path = self.path_of(name)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Ok(contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ServerError::ConfigNotFound(name.to_string()))
            }
            Err(e) => Err(ServerError::io(path, e)),
        }
    }

    async fn write(&self, name: &str, contents: &str) -> Result<()> {
        let path = self.path_of(name)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| ServerError::io(&self.dir, e))?;
        tokio::fs::write(&path, contents)
            .await
            .map_err(|e| ServerError::io(&path, e))?;
        debug!("Saved config {}", name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_write_list_read() {
        let dir = tempdir().unwrap();
        let store = DirConfigStore::new(dir.path().join("config"));
        assert!(store.list().await.unwrap().is_empty());

        store.write("b.cfg", "b").await.unwrap();
        write_json(&store, "server.json", &ServerConfig::default())
            .await
            .unwrap();

        assert_eq!(store.list().await.unwrap(), vec!["b.cfg", "server.json"]);
        let config: ServerConfig = read_json(&store, "server.json").await.unwrap();
        assert_eq!(config, ServerConfig::default());
    }

    #[tokio::test]
    async fn test_names_cannot_escape_the_directory() {
        let dir = tempdir().unwrap();
        let store = DirConfigStore::new(dir.path());

        for name in ["../x", "a/b", "/etc/passwd", ""] {
            assert!(matches!(
                store.read(name).await,
                Err(ServerError::InvalidConfigName(_))
            ));
        }
        assert!(matches!(
            store.read("missing.json").await,
            Err(ServerError::ConfigNotFound(_))
        ));
    }
}

use std::path::{Component, Path, PathBuf};

use anyhow::Context;
use bytes::Bytes;
use tokio::fs;
use tracing::debug;

use super::StorageClient;

/// Stores objects as plain files below a root directory.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
    url_prefix: String,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>, url_prefix: &str) -> Self {
        Self {
            root: root.into(),
            url_prefix: url_prefix.trim_end_matches('/').to_string(),
        }
    }

    fn path_for(&self, key: &str) -> anyhow::Result<PathBuf> {
        let rel = Path::new(key);
        let safe = !key.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        anyhow::ensure!(safe, "invalid storage key {:?}", key);
        Ok(self.root.join(rel))
    }
}

#[async_trait::async_trait]
impl StorageClient for LocalStorage {
    async fn put_object(&self, key: &str, body: Bytes, _content_type: &str) -> anyhow::Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create dir {}", parent.display()))?;
        }
        fs::write(&path, &body)
            .await
            .with_context(|| format!("write {}", path.display()))?;
        debug!(path = %path.display(), size = body.len(), "stored file");
        Ok(())
    }

    async fn get_object(&self, key: &str) -> anyhow::Result<Option<Bytes>> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("read {}", path.display())),
        }
    }

    async fn delete_object(&self, key: &str) -> anyhow::Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("remove {}", path.display())),
        }
    }

    async fn url_for(&self, key: &str) -> anyhow::Result<String> {
        Ok(format!("{}/{}", self.url_prefix, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_delete_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), "/uploads/");

        storage
            .put_object("model/u1/a.png", Bytes::from_static(b"png-bytes"), "image/png")
            .await
            .unwrap();
        assert!(dir.path().join("model/u1/a.png").exists());

        let got = storage.get_object("model/u1/a.png").await.unwrap();
        assert_eq!(got.as_deref(), Some(&b"png-bytes"[..]));

        storage.delete_object("model/u1/a.png").await.unwrap();
        assert!(storage.get_object("model/u1/a.png").await.unwrap().is_none());
        // second delete is a no-op
        storage.delete_object("model/u1/a.png").await.unwrap();
    }

    #[tokio::test]
    async fn url_uses_prefix() {
        let storage = LocalStorage::new("/tmp/whatever", "/uploads/");
        assert_eq!(
            storage.url_for("results/u/x.jpg").await.unwrap(),
            "/uploads/results/u/x.jpg"
        );
    }

    #[tokio::test]
    async fn rejects_keys_escaping_root() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), "/uploads");
        assert!(storage.get_object("../etc/passwd").await.is_err());
        assert!(storage.get_object("/etc/passwd").await.is_err());
        assert!(storage.get_object("").await.is_err());
    }
}

use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use vt_core::store::{StoreError, StoreFeatures, StoreResult};
use walkdir::WalkDir;

const TEMP_SUFFIX: &str = ".partial";

/// Disk cache tier: one file per path under `base_path`.
///
/// The file name is the last path component verbatim. Writes land in a
/// temporary sibling first and are renamed into place, so a reader never sees
/// a half-written image.
#[derive(Debug, Clone)]
pub struct LocalStore {
    base_path: PathBuf,
}

impl LocalStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        LocalStore {
            base_path: base_path.into(),
        }
    }

    fn resolve_path(&self, path: &str) -> StoreResult<PathBuf> {
        if path.is_empty()
            || path.starts_with('/')
            || path.split('/').any(|c| c.is_empty() || c == "." || c == "..")
        {
            return Err(StoreError::InvalidPath(path.to_owned()));
        }
        Ok(self.base_path.join(path))
    }
}

#[async_trait::async_trait]
impl vt_core::store::Store for LocalStore {
    fn features(&self) -> StoreFeatures {
        StoreFeatures {
            durable: true,
            case_sensitive: false,
        }
    }

    async fn exists(&self, path: &str) -> StoreResult<bool> {
        let full_path = self.resolve_path(path)?;
        Ok(tokio::fs::try_exists(&full_path).await?)
    }

    async fn put_bytes(&self, path: &str, bytes: Bytes) -> StoreResult<()> {
        let full_path = self.resolve_path(path)?;
        let parent = full_path
            .parent()
            .ok_or_else(|| StoreError::InvalidPath(path.to_owned()))?;
        let file_name = full_path
            .file_name()
            .ok_or_else(|| StoreError::InvalidPath(path.to_owned()))?
            .to_string_lossy();
        tokio::fs::create_dir_all(parent).await?;

        let tmp_path = parent.join(format!(".{}.{}{}", file_name, uuid::Uuid::new_v4(), TEMP_SUFFIX));
        let write = async {
            let mut tmp = tokio::fs::File::create(&tmp_path).await?;
            tmp.write_all(&bytes).await?;
            tmp.sync_all().await?;
            tokio::fs::rename(&tmp_path, &full_path).await
        };
        if let Err(e) = write.await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn read_bytes(&self, path: &str) -> StoreResult<Bytes> {
        let full_path = self.resolve_path(path)?;
        match tokio::fs::read(&full_path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, path: &str) -> StoreResult<()> {
        let full_path = self.resolve_path(path)?;
        match tokio::fs::remove_file(&full_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn size(&self, path: &str) -> StoreResult<u64> {
        let full_path = self.resolve_path(path)?;
        match tokio::fs::metadata(&full_path).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(
        &self,
    ) -> StoreResult<Box<dyn Stream<Item = Result<String, std::io::Error>> + Send + Unpin + 'static>>
    {
        let base_path = self.base_path.clone();
        if !tokio::fs::try_exists(&base_path).await? {
            return Ok(Box::new(futures::stream::empty()));
        }

        let walker = WalkDir::new(&base_path).into_iter();
        let stream = futures::stream::iter(walker).filter_map(move |entry| {
            futures::future::ready(match entry {
                Ok(entry) => {
                    let is_partial = entry.file_name().to_string_lossy().ends_with(TEMP_SUFFIX);
                    if entry.file_type().is_file() && !is_partial {
                        entry
                            .path()
                            .strip_prefix(&base_path)
                            .map(|relative| {
                                Ok::<_, std::io::Error>(relative
                                    .components()
                                    .map(|c| c.as_os_str().to_string_lossy())
                                    .collect::<Vec<_>>()
                                    .join("/"))
                            })
                            .ok()
                    } else {
                        None
                    }
                }
                Err(e) => Some(Err(std::io::Error::from(e))),
            })
        });

        Ok(Box::new(stream))
    }
}

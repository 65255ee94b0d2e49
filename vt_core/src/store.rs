use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;

pub type StoreResult<T, E = StoreError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("invalid path {0:?}")]
    InvalidPath(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound => true,
            Self::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

/// A flat key/value byte store used as one tier of the image cache.
///
/// Paths are relative, `/`-separated and never contain `..`.
#[async_trait]
pub trait Store: std::fmt::Debug + Send + Sync + 'static {
    fn features(&self) -> StoreFeatures;

    async fn exists(&self, path: &str) -> StoreResult<bool>;

    /// Stores `bytes` at `path`, replacing any previous value.
    ///
    /// Readers observe either the old value or the complete new one.
    async fn put_bytes(&self, path: &str, bytes: Bytes) -> StoreResult<()>;

    /// Returns the bytes at `path`, or [`StoreError::NotFound`].
    async fn read_bytes(&self, path: &str) -> StoreResult<Bytes>;

    /// Removes `path`. Removing a missing path is not an error.
    async fn delete(&self, path: &str) -> StoreResult<()>;

    async fn size(&self, path: &str) -> StoreResult<u64>;

    /// Lists every stored path.
    async fn list(
        &self,
    ) -> StoreResult<Box<dyn Stream<Item = Result<String, std::io::Error>> + Send + Unpin + 'static>>;
}

#[derive(Debug, Clone, Copy)]
pub struct StoreFeatures {
    /// Whether values survive a process restart.
    pub durable: bool,
    pub case_sensitive: bool,
}

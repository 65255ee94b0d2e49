use minicbor::{Decode, Encode};
use url::Url;

use crate::pin::{PinId, record_id};

record_id!(
    /// Identifies a [`Photo`] record.
    PhotoId
);

/// The key an asset is cached under.
///
/// In practice this is the final path segment of the asset URL, so photos that
/// share an asset URL share one cache entry. Keys double as file names on disk
/// and therefore never contain path separators.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Encode, Decode)]
pub struct CacheKey(#[n(0)] String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid cache key {0:?}")]
pub struct InvalidCacheKey(pub String);

impl CacheKey {
    pub fn new(key: impl Into<String>) -> Result<Self, InvalidCacheKey> {
        let key = key.into();
        if key.is_empty() || key == "." || key == ".." || key.contains(['/', '\\', '\0']) {
            return Err(InvalidCacheKey(key));
        }
        Ok(Self(key))
    }

    /// Derives the key from the last path segment of `url`.
    pub fn from_url(url: &Url) -> Result<Self, InvalidCacheKey> {
        let segment = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .unwrap_or_default();
        Self::new(segment).map_err(|_| InvalidCacheKey(url.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Photo metadata as returned by one search result entry.
///
/// Construction validates that the entry has everything a [`Photo`] record
/// needs, including a URL from which a cache key can be derived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoDescriptor {
    pub url: Url,
    pub remote_id: String,
    pub title: String,
    pub cache_key: CacheKey,
}

impl PhotoDescriptor {
    pub fn new(
        url: Url,
        remote_id: impl Into<String>,
        title: impl Into<String>,
    ) -> Result<Self, InvalidCacheKey> {
        let cache_key = CacheKey::from_url(&url)?;
        Ok(Self {
            url,
            remote_id: remote_id.into(),
            title: title.into(),
            cache_key,
        })
    }
}

/// A persisted photo belonging to a pin.
///
/// A record exists before its image bytes do; "image pending" is an ordinary
/// state, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Photo {
    #[n(0)]
    pub id: PhotoId,
    #[n(1)]
    pub pin_id: PinId,
    #[n(2)]
    pub remote_id: String,
    #[n(3)]
    pub title: String,
    #[n(4)]
    pub url: String,
    #[n(5)]
    pub cache_key: CacheKey,
}

impl Photo {
    pub fn from_descriptor(pin_id: PinId, descriptor: &PhotoDescriptor) -> Self {
        Self {
            id: PhotoId::random(),
            pin_id,
            remote_id: descriptor.remote_id.clone(),
            title: descriptor.title.clone(),
            url: descriptor.url.to_string(),
            cache_key: descriptor.cache_key.clone(),
        }
    }
}

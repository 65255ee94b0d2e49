//! Conformance suites for `Store` and `RecordStore` implementations.
//!
//! # Usage
//!
//! In your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! vt_core = { workspace = true, features = ["testutil"] }
//! ```
//!
//! In your test file:
//!
//! ```ignore
//! use vt_core::testutil::StoreTests;
//!
//! #[tokio::test]
//! async fn test_my_store() {
//!     let store = MyStore::new(...);
//!     StoreTests::new(&store).run_all().await.unwrap();
//! }
//! ```

use crate::{
    geo::Coordinates,
    page::Discovery,
    photo::{Photo, PhotoDescriptor, PhotoId},
    pin::Pin,
    records::{RecordEvent, RecordRef, RecordStore},
    store::{Store, StoreResult},
};
use bytes::Bytes;
use futures::StreamExt;
use rand::Rng;
use std::collections::HashSet;

/// Test suite for `Store` implementations.
pub struct StoreTests<'a, S> {
    store: &'a S,
    /// Prefix for test files to avoid conflicts
    prefix: String,
}

impl<'a, S: Store> StoreTests<'a, S> {
    pub fn new(store: &'a S) -> Self {
        let prefix = format!("_test_{}/", rand::rng().random::<u32>());
        Self { store, prefix }
    }

    fn path(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    pub async fn run_all(&self) -> StoreResult<()> {
        self.test_put_read().await?;
        self.test_exists().await?;
        self.test_size().await?;
        self.test_delete().await?;
        self.test_delete_missing().await?;
        self.test_read_missing().await?;
        self.test_list().await?;
        self.test_overwrite().await?;

        self.cleanup().await?;
        Ok(())
    }

    pub async fn test_put_read(&self) -> StoreResult<()> {
        let path = self.path("abc.jpg");
        let data = random_bytes(4096);

        self.store.put_bytes(&path, data.clone()).await?;

        let retrieved = self.store.read_bytes(&path).await?;
        assert_eq!(retrieved, data, "retrieved data should match original");
        Ok(())
    }

    pub async fn test_exists(&self) -> StoreResult<()> {
        let path = self.path("exists_test.bin");

        assert!(
            !self.store.exists(&path).await?,
            "file should not exist before creation"
        );
        self.store
            .put_bytes(&path, Bytes::from_static(b"test"))
            .await?;
        assert!(
            self.store.exists(&path).await?,
            "file should exist after creation"
        );
        Ok(())
    }

    pub async fn test_size(&self) -> StoreResult<()> {
        let path = self.path("size_test.bin");
        self.store
            .put_bytes(&path, Bytes::from(vec![42u8; 12345]))
            .await?;
        assert_eq!(self.store.size(&path).await?, 12345);
        Ok(())
    }

    pub async fn test_delete(&self) -> StoreResult<()> {
        let path = self.path("delete_test.bin");

        self.store
            .put_bytes(&path, Bytes::from_static(b"to be deleted"))
            .await?;
        self.store.delete(&path).await?;

        assert!(
            !self.store.exists(&path).await?,
            "file should not exist after delete"
        );
        Ok(())
    }

    /// Deleting something that is not there is not an error.
    pub async fn test_delete_missing(&self) -> StoreResult<()> {
        self.store.delete(&self.path("never_written.bin")).await?;
        Ok(())
    }

    pub async fn test_read_missing(&self) -> StoreResult<()> {
        let err = self
            .store
            .read_bytes(&self.path("never_written.bin"))
            .await
            .expect_err("reading a missing path should fail");
        assert!(err.is_not_found(), "expected not-found, got {err}");
        Ok(())
    }

    pub async fn test_list(&self) -> StoreResult<()> {
        let files = ["list_a.bin", "list_b.bin", "subdir/list_c.bin"];

        for file in &files {
            self.store
                .put_bytes(&self.path(file), Bytes::from_static(b"list test"))
                .await?;
        }

        let mut stream = self.store.list().await?;
        let mut found: HashSet<String> = HashSet::new();
        while let Some(result) = stream.next().await {
            let path = result?.replace('\\', "/");
            if path.starts_with(&self.prefix) {
                found.insert(path);
            }
        }

        for file in &files {
            let path = self.path(file);
            assert!(found.contains(&path), "list should contain {}", path);
        }
        Ok(())
    }

    pub async fn test_overwrite(&self) -> StoreResult<()> {
        let path = self.path("overwrite_test.bin");

        self.store
            .put_bytes(&path, Bytes::from_static(b"original content"))
            .await?;
        self.store
            .put_bytes(&path, Bytes::from_static(b"new content"))
            .await?;

        let retrieved = self.store.read_bytes(&path).await?;
        assert_eq!(retrieved.as_ref(), b"new content");
        Ok(())
    }

    pub async fn cleanup(&self) -> StoreResult<()> {
        let mut stream = self.store.list().await?;
        let mut paths = Vec::new();
        while let Some(result) = stream.next().await {
            let path = result?;
            if path.replace('\\', "/").starts_with(&self.prefix) {
                paths.push(path);
            }
        }
        for path in paths {
            let _ = self.store.delete(&path).await;
        }
        Ok(())
    }
}

/// Test suite for `RecordStore` implementations.
///
/// Each test creates its own pins, so the suite can run against a store that
/// already holds data.
pub struct RecordStoreTests<'a, R> {
    records: &'a R,
}

impl<'a, R: RecordStore> RecordStoreTests<'a, R> {
    pub fn new(records: &'a R) -> Self {
        Self { records }
    }

    pub async fn run_all(&self) -> anyhow::Result<()> {
        self.test_pin_roundtrip().await?;
        self.test_update_pin().await?;
        self.test_replace_photos().await?;
        self.test_delete_photos().await?;
        self.test_delete_pin_cascades().await?;
        self.test_events().await?;
        Ok(())
    }

    pub async fn test_pin_roundtrip(&self) -> anyhow::Result<()> {
        let pin = sample_pin("roundtrip");
        self.records.insert_pin(&pin).await?;

        assert_eq!(self.records.get_pin(pin.id).await?, Some(pin.clone()));
        let listed = self.records.list_pins().await?;
        assert!(listed.iter().any(|p| p.id == pin.id));
        Ok(())
    }

    pub async fn test_update_pin(&self) -> anyhow::Result<()> {
        let mut pin = sample_pin("update");
        self.records.insert_pin(&pin).await?;

        pin.record_discovery(Discovery::Pages(7));
        pin.current_page = 3;
        self.records.update_pin(&pin).await?;

        let stored = self.records.get_pin(pin.id).await?.expect("pin exists");
        assert_eq!(stored.total_pages, Some(7));
        assert_eq!(stored.current_page, 3);
        assert!(stored.discovered);

        let missing = sample_pin("never inserted");
        assert!(
            self.records.update_pin(&missing).await.is_err(),
            "updating a missing pin should fail"
        );
        Ok(())
    }

    pub async fn test_replace_photos(&self) -> anyhow::Result<()> {
        let pin = sample_pin("replace");
        self.records.insert_pin(&pin).await?;

        let first = sample_photos(&pin, 3);
        let removed = self.records.replace_photos(&pin, &first).await?;
        assert!(removed.is_empty());
        assert_eq!(self.records.photos_for_pin(pin.id).await?, first);

        let second = sample_photos(&pin, 2);
        let removed = self.records.replace_photos(&pin, &second).await?;
        assert_eq!(ids(&removed), ids(&first));
        assert_eq!(self.records.photos_for_pin(pin.id).await?, second);
        assert!(self.records.get_photo(first[0].id).await?.is_none());
        assert_eq!(
            self.records.get_photo(second[1].id).await?,
            Some(second[1].clone())
        );
        Ok(())
    }

    pub async fn test_delete_photos(&self) -> anyhow::Result<()> {
        let pin = sample_pin("delete photos");
        self.records.insert_pin(&pin).await?;
        let photos = sample_photos(&pin, 4);
        self.records.replace_photos(&pin, &photos).await?;

        let unknown = PhotoId::random();
        let removed = self
            .records
            .delete_photos(pin.id, &[photos[1].id, unknown, photos[3].id])
            .await?;
        assert_eq!(ids(&removed), vec![photos[1].id, photos[3].id]);

        let remaining = self.records.photos_for_pin(pin.id).await?;
        assert_eq!(ids(&remaining), vec![photos[0].id, photos[2].id]);
        Ok(())
    }

    pub async fn test_delete_pin_cascades(&self) -> anyhow::Result<()> {
        let pin = sample_pin("cascade");
        let other = sample_pin("bystander");
        self.records.insert_pin(&pin).await?;
        self.records.insert_pin(&other).await?;
        let photos = sample_photos(&pin, 2);
        let other_photos = sample_photos(&other, 1);
        self.records.replace_photos(&pin, &photos).await?;
        self.records.replace_photos(&other, &other_photos).await?;

        let removed = self.records.delete_pin(pin.id).await?;
        assert_eq!(ids(&removed), ids(&photos));
        assert!(self.records.get_pin(pin.id).await?.is_none());
        assert!(self.records.photos_for_pin(pin.id).await?.is_empty());
        assert_eq!(self.records.photos_for_pin(other.id).await?, other_photos);

        assert!(self.records.delete_pin(pin.id).await?.is_empty());
        Ok(())
    }

    pub async fn test_events(&self) -> anyhow::Result<()> {
        let mut events = self.records.subscribe();
        let pin = sample_pin("events");
        self.records.insert_pin(&pin).await?;
        let photos = sample_photos(&pin, 1);
        self.records.replace_photos(&pin, &photos).await?;
        self.records.delete_pin(pin.id).await?;

        let photo = RecordRef::Photo {
            pin: pin.id,
            photo: photos[0].id,
        };
        let expected = [
            RecordEvent::Inserted(RecordRef::Pin(pin.id)),
            RecordEvent::Updated(RecordRef::Pin(pin.id)),
            RecordEvent::Inserted(photo),
            RecordEvent::Deleted(photo),
            RecordEvent::Deleted(RecordRef::Pin(pin.id)),
        ];
        for want in expected {
            assert_eq!(events.recv().await?, want);
        }
        Ok(())
    }
}

pub fn sample_pin(name: &str) -> Pin {
    Pin::new(name, Coordinates::new(37.7749, -122.4194))
}

pub fn sample_photos(pin: &Pin, count: usize) -> Vec<Photo> {
    (0..count)
        .map(|i| {
            let suffix = rand::rng().random::<u32>();
            let url = format!("https://live.example.com/65535/{suffix}_{i}_m.jpg");
            let descriptor = PhotoDescriptor::new(
                url.parse().expect("sample URL is valid"),
                format!("{suffix}{i}"),
                format!("photo {i}"),
            )
            .expect("sample URL has a file segment");
            Photo::from_descriptor(pin.id, &descriptor)
        })
        .collect()
}

fn ids(photos: &[Photo]) -> Vec<PhotoId> {
    photos.iter().map(|p| p.id).collect()
}

/// Generate random bytes for testing.
pub fn random_bytes(len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    rand::rng().fill(&mut data[..]);
    Bytes::from(data)
}

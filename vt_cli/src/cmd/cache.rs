use std::collections::HashSet;

use anyhow::Result;
use vt_core::{CacheKey, ImageCache, RecordStore};
use vt_pipeline::Pipeline;

use crate::CacheCmd;

pub async fn run_cache(cmd: CacheCmd, pipeline: &Pipeline) -> Result<()> {
    match cmd {
        CacheCmd::Prune { dry_run } => {
            let unreferenced =
                unreferenced_keys(pipeline.cache(), pipeline.records().as_ref()).await?;
            if dry_run {
                println!("would delete {} cached images:", unreferenced.len());
                for key in &unreferenced {
                    println!("{key}");
                }
                return Ok(());
            }
            for key in &unreferenced {
                pipeline.cache().evict(key).await;
            }
            println!("deleted {} cached images", unreferenced.len());
        }
    }
    Ok(())
}

/// Cached photo images that no photo record points at.
async fn unreferenced_keys(cache: &ImageCache, records: &dyn RecordStore) -> Result<Vec<CacheKey>> {
    let mut referenced = HashSet::new();
    for pin in records.list_pins().await? {
        for photo in records.photos_for_pin(pin.id).await? {
            referenced.insert(photo.cache_key);
        }
    }

    let mut keys: Vec<_> = cache
        .keys()
        .await?
        .into_iter()
        .filter(|key| !referenced.contains(key))
        .collect();
    keys.sort();
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use vt_cache_local::LocalStore;
    use vt_cache_memory::MemoryStore;
    use vt_core::{Coordinates, Photo, PhotoDescriptor, Pin};
    use vt_records_redb::RedbRecords;

    #[tokio::test]
    async fn only_unreferenced_images_are_pruned() {
        let dir = tempfile::tempdir().unwrap();
        let records = RedbRecords::open(dir.path()).unwrap();
        let cache = ImageCache::new(MemoryStore::new(), LocalStore::new(dir.path().join("cache")));

        let pin = Pin::new("Embarcadero", Coordinates::new(37.7955, -122.3937));
        records.insert_pin(&pin).await.unwrap();
        let descriptor = PhotoDescriptor::new(
            "https://live.staticflickr.com/1/kept_m.jpg".parse().unwrap(),
            "1",
            "kept",
        )
        .unwrap();
        let kept = Photo::from_descriptor(pin.id, &descriptor);
        records.replace_photos(&pin, &[kept.clone()]).await.unwrap();

        let orphan = CacheKey::new("orphan_m.jpg").unwrap();
        let image = Bytes::from_static(b"jpeg");
        cache.put(&kept.cache_key, Some(image.clone())).await.unwrap();
        cache.put(&orphan, Some(image)).await.unwrap();

        let unreferenced = unreferenced_keys(&cache, &records).await.unwrap();
        assert_eq!(unreferenced, vec![orphan]);
    }
}

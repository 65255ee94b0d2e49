//! RedbRecords - a durable `RecordStore` backed by redb.
//!
//! Pins and photos are stored as CBOR values keyed by their 16-byte ids. A
//! third table keeps each pin's photo ids in saved order. Every mutation runs
//! in a single write transaction on the blocking pool, and change events are
//! published only after the transaction commits.

use minicbor::{Decode, Encode};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction};
use std::{path::Path, sync::Arc};
use tokio::sync::broadcast;
use vt_core::{
    Photo, PhotoId, Pin, PinId, RecordEvent, RecordRef, RecordStore,
    records::{RECORD_EVENT_CAPACITY, replace_events},
};

const PINS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("pins");
const PHOTOS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("photos");
/// Pin id to the CBOR list of its photo ids, in saved order.
const PIN_PHOTOS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("pin_photos");

pub const DB_FILE_NAME: &str = "records.redb";

#[derive(Clone)]
pub struct RedbRecords {
    db: Arc<Database>,
    events: broadcast::Sender<RecordEvent>,
}

impl RedbRecords {
    /// Opens (or creates) `records.redb` inside `dir`.
    pub fn open<P: AsRef<Path>>(dir: P) -> anyhow::Result<Self> {
        let db = Database::create(dir.as_ref().join(DB_FILE_NAME))?;

        // Create all tables up front so first reads on a fresh file succeed.
        {
            let write_txn = db.begin_write()?;
            {
                let _ = write_txn.open_table(PINS)?;
                let _ = write_txn.open_table(PHOTOS)?;
                let _ = write_txn.open_table(PIN_PHOTOS)?;
            }
            write_txn.commit()?;
        }

        let (events, _) = broadcast::channel(RECORD_EVENT_CAPACITY);
        Ok(Self {
            db: Arc::new(db),
            events,
        })
    }

    async fn read<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| anyhow::anyhow!("redb read task failed: {}", e))?
    }

    /// Runs `f` in one write transaction and commits it if `f` succeeds.
    async fn write<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&WriteTransaction) -> anyhow::Result<T> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<T> {
            let write_txn = db.begin_write()?;
            let value = f(&write_txn)?;
            write_txn.commit()?;
            Ok(value)
        })
        .await
        .map_err(|e| anyhow::anyhow!("redb write task failed: {}", e))?
    }

    fn publish(&self, events: impl IntoIterator<Item = RecordEvent>) {
        for event in events {
            let _ = self.events.send(event);
        }
    }
}

impl std::fmt::Debug for RedbRecords {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbRecords").finish()
    }
}

fn encode<T: Encode<()>>(value: &T) -> anyhow::Result<Vec<u8>> {
    minicbor::to_vec(value).map_err(|e| anyhow::anyhow!("failed to encode record: {e}"))
}

fn decode<T: for<'b> Decode<'b, ()>>(bytes: &[u8]) -> anyhow::Result<T> {
    minicbor::decode(bytes).map_err(|e| anyhow::anyhow!("corrupt record: {e}"))
}

fn photo_ref(photo: &Photo) -> RecordRef {
    RecordRef::Photo {
        pin: photo.pin_id,
        photo: photo.id,
    }
}

fn pin_exists(txn: &WriteTransaction, id: PinId) -> anyhow::Result<bool> {
    let pins = txn.open_table(PINS)?;
    Ok(pins.get(&id.as_bytes()[..])?.is_some())
}

fn load_photo_ids(txn: &WriteTransaction, pin: PinId) -> anyhow::Result<Vec<PhotoId>> {
    let index = txn.open_table(PIN_PHOTOS)?;
    let ids = index
        .get(&pin.as_bytes()[..])?
        .map(|guard| decode::<Vec<PhotoId>>(guard.value()))
        .transpose()?;
    Ok(ids.unwrap_or_default())
}

fn store_photo_ids(txn: &WriteTransaction, pin: PinId, ids: &[PhotoId]) -> anyhow::Result<()> {
    let mut index = txn.open_table(PIN_PHOTOS)?;
    if ids.is_empty() {
        index.remove(&pin.as_bytes()[..])?;
    } else {
        index.insert(&pin.as_bytes()[..], encode(&ids.to_vec())?.as_slice())?;
    }
    Ok(())
}

/// Removes the photo rows for `ids`, returning those that existed.
fn remove_photos(txn: &WriteTransaction, ids: &[PhotoId]) -> anyhow::Result<Vec<Photo>> {
    let mut photos = txn.open_table(PHOTOS)?;
    let mut removed = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(guard) = photos.remove(&id.as_bytes()[..])? {
            removed.push(decode::<Photo>(guard.value())?);
        }
    }
    Ok(removed)
}

#[async_trait::async_trait]
impl RecordStore for RedbRecords {
    async fn insert_pin(&self, pin: &Pin) -> anyhow::Result<()> {
        let id = pin.id;
        let value = encode(pin)?;
        self.write(move |txn| {
            let mut pins = txn.open_table(PINS)?;
            if pins.get(&id.as_bytes()[..])?.is_some() {
                anyhow::bail!("pin {id} already exists");
            }
            pins.insert(&id.as_bytes()[..], value.as_slice())?;
            Ok(())
        })
        .await?;

        self.publish([RecordEvent::Inserted(RecordRef::Pin(id))]);
        Ok(())
    }

    async fn update_pin(&self, pin: &Pin) -> anyhow::Result<()> {
        let id = pin.id;
        let value = encode(pin)?;
        self.write(move |txn| {
            if !pin_exists(txn, id)? {
                anyhow::bail!("pin {id} not found");
            }
            let mut pins = txn.open_table(PINS)?;
            pins.insert(&id.as_bytes()[..], value.as_slice())?;
            Ok(())
        })
        .await?;

        self.publish([RecordEvent::Updated(RecordRef::Pin(id))]);
        Ok(())
    }

    async fn get_pin(&self, id: PinId) -> anyhow::Result<Option<Pin>> {
        self.read(move |db| {
            let read_txn = db.begin_read()?;
            let pins = read_txn.open_table(PINS)?;
            let pin = pins
                .get(&id.as_bytes()[..])?
                .map(|guard| decode::<Pin>(guard.value()))
                .transpose()?;
            Ok(pin)
        })
        .await
    }

    async fn list_pins(&self) -> anyhow::Result<Vec<Pin>> {
        self.read(|db| {
            let read_txn = db.begin_read()?;
            let pins = read_txn.open_table(PINS)?;
            let mut all = Vec::new();
            for entry in pins.iter()? {
                let (_key, value) = entry?;
                all.push(decode::<Pin>(value.value())?);
            }
            all.sort_by_key(|p| p.created_at);
            Ok(all)
        })
        .await
    }

    async fn delete_pin(&self, id: PinId) -> anyhow::Result<Vec<Photo>> {
        let removed = self
            .write(move |txn| {
                let existed = {
                    let mut pins = txn.open_table(PINS)?;
                    pins.remove(&id.as_bytes()[..])?.is_some()
                };
                if !existed {
                    return Ok(None);
                }
                let ids = load_photo_ids(txn, id)?;
                store_photo_ids(txn, id, &[])?;
                remove_photos(txn, &ids).map(Some)
            })
            .await?;

        let Some(removed) = removed else {
            return Ok(Vec::new());
        };
        self.publish(
            removed
                .iter()
                .map(|p| RecordEvent::Deleted(photo_ref(p)))
                .chain([RecordEvent::Deleted(RecordRef::Pin(id))]),
        );
        Ok(removed)
    }

    async fn photos_for_pin(&self, pin: PinId) -> anyhow::Result<Vec<Photo>> {
        self.read(move |db| {
            let read_txn = db.begin_read()?;
            let index = read_txn.open_table(PIN_PHOTOS)?;
            let photos = read_txn.open_table(PHOTOS)?;

            let ids = index
                .get(&pin.as_bytes()[..])?
                .map(|guard| decode::<Vec<PhotoId>>(guard.value()))
                .transpose()?
                .unwrap_or_default();

            let mut owned = Vec::with_capacity(ids.len());
            for id in ids {
                match photos.get(&id.as_bytes()[..])? {
                    Some(guard) => owned.push(decode::<Photo>(guard.value())?),
                    None => tracing::warn!(%pin, photo = %id, "photo index points at a missing row"),
                }
            }
            Ok(owned)
        })
        .await
    }

    async fn get_photo(&self, id: PhotoId) -> anyhow::Result<Option<Photo>> {
        self.read(move |db| {
            let read_txn = db.begin_read()?;
            let photos = read_txn.open_table(PHOTOS)?;
            let photo = photos
                .get(&id.as_bytes()[..])?
                .map(|guard| decode::<Photo>(guard.value()))
                .transpose()?;
            Ok(photo)
        })
        .await
    }

    async fn replace_photos(&self, pin: &Pin, photos: &[Photo]) -> anyhow::Result<Vec<Photo>> {
        if let Some(stray) = photos.iter().find(|p| p.pin_id != pin.id) {
            anyhow::bail!("photo {} does not belong to pin {}", stray.id, pin.id);
        }

        let id = pin.id;
        let pin_value = encode(pin)?;
        let rows = photos
            .iter()
            .map(|p| Ok((p.id, encode(p)?)))
            .collect::<anyhow::Result<Vec<_>>>()?;

        let removed = self
            .write(move |txn| {
                if !pin_exists(txn, id)? {
                    anyhow::bail!("pin {id} not found");
                }
                txn.open_table(PINS)?
                    .insert(&id.as_bytes()[..], pin_value.as_slice())?;

                let old_ids = load_photo_ids(txn, id)?;
                let removed = remove_photos(txn, &old_ids)?;

                let mut table = txn.open_table(PHOTOS)?;
                for (photo_id, value) in &rows {
                    table.insert(&photo_id.as_bytes()[..], value.as_slice())?;
                }
                drop(table);

                let new_ids: Vec<PhotoId> = rows.iter().map(|(photo_id, _)| *photo_id).collect();
                store_photo_ids(txn, id, &new_ids)?;
                Ok(removed)
            })
            .await?;

        self.publish(replace_events(pin, &removed, photos));
        Ok(removed)
    }

    async fn delete_photos(&self, pin: PinId, ids: &[PhotoId]) -> anyhow::Result<Vec<Photo>> {
        let ids = ids.to_vec();
        let removed = self
            .write(move |txn| {
                let owned = load_photo_ids(txn, pin)?;
                let (doomed, kept): (Vec<_>, Vec<_>) =
                    owned.into_iter().partition(|id| ids.contains(id));
                if doomed.is_empty() {
                    return Ok(Vec::new());
                }
                store_photo_ids(txn, pin, &kept)?;
                remove_photos(txn, &doomed)
            })
            .await?;

        self.publish(removed.iter().map(|p| RecordEvent::Deleted(photo_ref(p))));
        Ok(removed)
    }

    fn subscribe(&self) -> broadcast::Receiver<RecordEvent> {
        self.events.subscribe()
    }
}

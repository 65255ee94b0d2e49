//! In-memory `RecordStore`.
//!
//! Useful for tests and for running the pipeline without a database. Every
//! save happens under one write lock, so a batch is visible all at once or
//! not at all.

use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

use anyhow::bail;
use tokio::sync::broadcast;
use vt_core::{
    Photo, PhotoId, Pin, PinId, RecordEvent, RecordRef, RecordStore,
    records::{RECORD_EVENT_CAPACITY, replace_events},
};

#[derive(Debug, Default)]
struct Records {
    /// Insertion order.
    pins: Vec<Pin>,
    photos: HashMap<PinId, Vec<Photo>>,
}

#[derive(Debug)]
pub struct MemoryRecords {
    data: RwLock<Records>,
    events: broadcast::Sender<RecordEvent>,
}

impl MemoryRecords {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(RECORD_EVENT_CAPACITY);
        Self {
            data: RwLock::default(),
            events,
        }
    }

    fn publish(&self, events: impl IntoIterator<Item = RecordEvent>) {
        for event in events {
            // No subscribers is fine.
            let _ = self.events.send(event);
        }
    }
}

impl Default for MemoryRecords {
    fn default() -> Self {
        Self::new()
    }
}

fn photo_ref(photo: &Photo) -> RecordRef {
    RecordRef::Photo {
        pin: photo.pin_id,
        photo: photo.id,
    }
}

#[async_trait::async_trait]
impl RecordStore for MemoryRecords {
    async fn insert_pin(&self, pin: &Pin) -> anyhow::Result<()> {
        {
            let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
            if data.pins.iter().any(|p| p.id == pin.id) {
                bail!("pin {} already exists", pin.id);
            }
            data.pins.push(pin.clone());
        }
        self.publish([RecordEvent::Inserted(RecordRef::Pin(pin.id))]);
        Ok(())
    }

    async fn update_pin(&self, pin: &Pin) -> anyhow::Result<()> {
        {
            let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
            let Some(stored) = data.pins.iter_mut().find(|p| p.id == pin.id) else {
                bail!("pin {} not found", pin.id);
            };
            *stored = pin.clone();
        }
        self.publish([RecordEvent::Updated(RecordRef::Pin(pin.id))]);
        Ok(())
    }

    async fn get_pin(&self, id: PinId) -> anyhow::Result<Option<Pin>> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        Ok(data.pins.iter().find(|p| p.id == id).cloned())
    }

    async fn list_pins(&self) -> anyhow::Result<Vec<Pin>> {
        let mut pins = self
            .data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .pins
            .clone();
        pins.sort_by_key(|p| p.created_at);
        Ok(pins)
    }

    async fn delete_pin(&self, id: PinId) -> anyhow::Result<Vec<Photo>> {
        let removed = {
            let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
            let Some(index) = data.pins.iter().position(|p| p.id == id) else {
                return Ok(Vec::new());
            };
            data.pins.remove(index);
            data.photos.remove(&id).unwrap_or_default()
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
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        Ok(data.photos.get(&pin).cloned().unwrap_or_default())
    }

    async fn get_photo(&self, id: PhotoId) -> anyhow::Result<Option<Photo>> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        Ok(data
            .photos
            .values()
            .flatten()
            .find(|p| p.id == id)
            .cloned())
    }

    async fn replace_photos(&self, pin: &Pin, photos: &[Photo]) -> anyhow::Result<Vec<Photo>> {
        if let Some(stray) = photos.iter().find(|p| p.pin_id != pin.id) {
            bail!("photo {} does not belong to pin {}", stray.id, pin.id);
        }

        let removed = {
            let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
            let Some(stored) = data.pins.iter_mut().find(|p| p.id == pin.id) else {
                bail!("pin {} not found", pin.id);
            };
            *stored = pin.clone();
            data.photos
                .insert(pin.id, photos.to_vec())
                .unwrap_or_default()
        };

        self.publish(replace_events(pin, &removed, photos));
        Ok(removed)
    }

    async fn delete_photos(&self, pin: PinId, ids: &[PhotoId]) -> anyhow::Result<Vec<Photo>> {
        let removed = {
            let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
            let Some(owned) = data.photos.get_mut(&pin) else {
                return Ok(Vec::new());
            };
            let (removed, kept): (Vec<_>, Vec<_>) =
                owned.drain(..).partition(|p| ids.contains(&p.id));
            *owned = kept;
            removed
        };

        self.publish(removed.iter().map(|p| RecordEvent::Deleted(photo_ref(p))));
        Ok(removed)
    }

    fn subscribe(&self) -> broadcast::Receiver<RecordEvent> {
        self.events.subscribe()
    }
}

//! Durable Pin and Photo persistence.
//!
//! The acquisition pipeline treats the record store as an external
//! transactional collaborator: it creates and deletes records only after a
//! network step completes, and every batch lands in one scoped save.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::{
    photo::{Photo, PhotoId},
    pin::{Pin, PinId},
};

/// Which record a change event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordRef {
    Pin(PinId),
    Photo { pin: PinId, photo: PhotoId },
}

/// Change notification emitted after a save commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordEvent {
    Inserted(RecordRef),
    Updated(RecordRef),
    Deleted(RecordRef),
}

/// Capacity of the change-event channel implementations should use.
pub const RECORD_EVENT_CAPACITY: usize = 1024;

#[async_trait]
pub trait RecordStore: std::fmt::Debug + Send + Sync + 'static {
    async fn insert_pin(&self, pin: &Pin) -> anyhow::Result<()>;

    /// Saves the pin's mutable state. Fails if the pin does not exist.
    async fn update_pin(&self, pin: &Pin) -> anyhow::Result<()>;

    async fn get_pin(&self, id: PinId) -> anyhow::Result<Option<Pin>>;

    /// All pins, oldest first.
    async fn list_pins(&self) -> anyhow::Result<Vec<Pin>>;

    /// Deletes a pin and every photo it owns, returning the removed photos.
    ///
    /// Deleting a missing pin removes nothing.
    async fn delete_pin(&self, id: PinId) -> anyhow::Result<Vec<Photo>>;

    /// The photos owned by `pin`, in the order they were saved.
    async fn photos_for_pin(&self, pin: PinId) -> anyhow::Result<Vec<Photo>>;

    async fn get_photo(&self, id: PhotoId) -> anyhow::Result<Option<Photo>>;

    /// One scoped save: stores `pin`, drops the photos it currently owns and
    /// inserts `photos` in order. Returns the photos that were dropped.
    async fn replace_photos(&self, pin: &Pin, photos: &[Photo]) -> anyhow::Result<Vec<Photo>>;

    /// Deletes the listed photos of `pin`, returning the ones that existed.
    async fn delete_photos(&self, pin: PinId, ids: &[PhotoId]) -> anyhow::Result<Vec<Photo>>;

    /// Subscribes to change events for saves that commit after this call.
    fn subscribe(&self) -> broadcast::Receiver<RecordEvent>;
}

/// Builds the events describing a committed [`RecordStore::replace_photos`].
pub fn replace_events(pin: &Pin, removed: &[Photo], inserted: &[Photo]) -> Vec<RecordEvent> {
    let photo_ref = |photo: &Photo| RecordRef::Photo {
        pin: photo.pin_id,
        photo: photo.id,
    };

    let mut events = Vec::with_capacity(1 + removed.len() + inserted.len());
    events.push(RecordEvent::Updated(RecordRef::Pin(pin.id)));
    events.extend(removed.iter().map(|p| RecordEvent::Deleted(photo_ref(p))));
    events.extend(inserted.iter().map(|p| RecordEvent::Inserted(photo_ref(p))));
    events
}

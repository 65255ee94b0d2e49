use serde::{Deserialize, Serialize};
use vt_core::{PartialPageError, Photo, PhotoDescriptor, Pin};

/// Which page a freshly discovered pin loads first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitialPage {
    /// Page 1.
    #[default]
    First,
    /// The last page, `total_pages`.
    Last,
}

impl InitialPage {
    pub fn page(self, total_pages: u32) -> u32 {
        match self {
            InitialPage::First => 1,
            InitialPage::Last => total_pages.max(1),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub initial_page: InitialPage,
}

/// Result of loading a page of photos for a pin.
///
/// `NoPhotos` means the search found nothing at this location. It is a
/// final answer, not a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquisition {
    NoPhotos,
    Loaded {
        page: u32,
        photos: Vec<Photo>,
        skipped: usize,
    },
}

impl Acquisition {
    pub fn photos(&self) -> &[Photo] {
        match self {
            Acquisition::NoPhotos => &[],
            Acquisition::Loaded { photos, .. } => photos,
        }
    }

    pub fn partial(&self) -> Option<PartialPageError> {
        match self {
            Acquisition::Loaded {
                page,
                photos,
                skipped,
            } if *skipped > 0 => Some(PartialPageError {
                page: *page,
                accepted: photos.len(),
                skipped: *skipped,
            }),
            _ => None,
        }
    }
}

/// How a pin's scheduled downloads ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadSummary {
    pub cached: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl DownloadSummary {
    pub fn total(&self) -> usize {
        self.cached + self.failed + self.cancelled
    }
}

impl std::ops::AddAssign for DownloadSummary {
    fn add_assign(&mut self, rhs: Self) {
        self.cached += rhs.cached;
        self.failed += rhs.failed;
        self.cancelled += rhs.cancelled;
    }
}

/// Creates one record per descriptor, owned by `pin`, in response order.
pub fn materialize(pin: &Pin, descriptors: &[PhotoDescriptor]) -> Vec<Photo> {
    descriptors
        .iter()
        .map(|descriptor| Photo::from_descriptor(pin.id, descriptor))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use vt_core::Coordinates;

    #[test]
    fn initial_page_policy() {
        assert_eq!(InitialPage::First.page(3), 1);
        assert_eq!(InitialPage::Last.page(3), 3);
        assert_eq!(InitialPage::Last.page(1), 1);
    }

    #[test]
    fn policy_reads_lowercase() {
        #[derive(Deserialize)]
        struct Wrapper {
            pipeline: PipelineConfig,
        }
        let parsed: Wrapper = serde_json::from_str(r#"{"pipeline":{"initial_page":"last"}}"#).unwrap();
        assert_eq!(parsed.pipeline.initial_page, InitialPage::Last);
        let parsed: Wrapper = serde_json::from_str(r#"{"pipeline":{}}"#).unwrap();
        assert_eq!(parsed.pipeline.initial_page, InitialPage::First);
    }

    #[test]
    fn materialize_keeps_order_and_owner() {
        let pin = Pin::new("Alcatraz", Coordinates::new(37.8267, -122.4230));
        let descriptors: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|name| {
                PhotoDescriptor::new(
                    format!("https://live.staticflickr.com/1/{name}.jpg").parse().unwrap(),
                    *name,
                    name.to_uppercase(),
                )
                .unwrap()
            })
            .collect();

        let photos = materialize(&pin, &descriptors);
        let keys: Vec<_> = photos.iter().map(|p| p.cache_key.as_str()).collect();
        assert_eq!(keys, ["a.jpg", "b.jpg", "c.jpg"]);
        assert!(photos.iter().all(|p| p.pin_id == pin.id));
    }

    #[test]
    fn partial_acquisition() {
        let loaded = Acquisition::Loaded {
            page: 2,
            photos: vec![],
            skipped: 1,
        };
        assert_eq!(loaded.partial().map(|p| p.skipped), Some(1));
        assert!(Acquisition::NoPhotos.partial().is_none());
    }
}

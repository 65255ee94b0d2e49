use crate::photo::PhotoDescriptor;

/// Outcome of learning how many result pages exist for a location.
///
/// `Empty` is a final, successful answer ("no photos here"), never a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discovery {
    Empty,
    Pages(u32),
}

impl Discovery {
    pub fn from_total(total_pages: u32) -> Self {
        if total_pages == 0 {
            Self::Empty
        } else {
            Self::Pages(total_pages)
        }
    }

    pub fn total_pages(&self) -> u32 {
        match self {
            Self::Empty => 0,
            Self::Pages(n) => *n,
        }
    }
}

/// One page of decoded search results.
///
/// Entries that lacked a URL, id or title were dropped and counted in
/// `skipped`; the page itself still succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub number: u32,
    pub descriptors: Vec<PhotoDescriptor>,
    pub skipped: usize,
}

impl Page {
    /// Describes the dropped entries, if any were dropped.
    pub fn partial(&self) -> Option<PartialPageError> {
        (self.skipped > 0).then(|| PartialPageError {
            page: self.number,
            accepted: self.descriptors.len(),
            skipped: self.skipped,
        })
    }
}

/// Some entries on a page were malformed and skipped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("skipped {skipped} malformed photo entries on page {page} ({accepted} accepted)")]
pub struct PartialPageError {
    pub page: u32,
    pub accepted: usize,
    pub skipped: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_pages_is_empty() {
        assert_eq!(Discovery::from_total(0), Discovery::Empty);
        assert_eq!(Discovery::from_total(3), Discovery::Pages(3));
        assert_eq!(Discovery::Empty.total_pages(), 0);
    }

    #[test]
    fn complete_page_is_not_partial() {
        let page = Page {
            number: 2,
            descriptors: vec![],
            skipped: 0,
        };
        assert!(page.partial().is_none());

        let page = Page { skipped: 3, ..page };
        assert_eq!(
            page.partial(),
            Some(PartialPageError {
                page: 2,
                accepted: 0,
                skipped: 3
            })
        );
    }
}

use minicbor::{Decode, Encode};

use crate::{error::FetchError, geo::Coordinates, page::Discovery};

/// Declares a UUID-backed record identifier that encodes as a CBOR byte string.
macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(::uuid::Uuid);

        impl $name {
            pub fn random() -> Self {
                Self(::uuid::Uuid::new_v4())
            }

            pub const fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(::uuid::Uuid::from_bytes(bytes))
            }

            pub const fn as_bytes(&self) -> &[u8; 16] {
                self.0.as_bytes()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                std::fmt::Display::fmt(&self.0, f)
            }
        }

        impl std::str::FromStr for $name {
            type Err = ::uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                ::uuid::Uuid::parse_str(s).map(Self)
            }
        }

        impl<C> ::minicbor::Encode<C> for $name {
            fn encode<W: ::minicbor::encode::Write>(
                &self,
                e: &mut ::minicbor::Encoder<W>,
                _ctx: &mut C,
            ) -> Result<(), ::minicbor::encode::Error<W::Error>> {
                e.bytes(self.0.as_bytes())?.ok()
            }
        }

        impl<'b, C> ::minicbor::Decode<'b, C> for $name {
            fn decode(
                d: &mut ::minicbor::Decoder<'b>,
                _ctx: &mut C,
            ) -> Result<Self, ::minicbor::decode::Error> {
                let bytes = d.bytes()?;
                ::uuid::Uuid::from_slice(bytes)
                    .map(Self)
                    .map_err(|e| ::minicbor::decode::Error::message(e.to_string()))
            }
        }
    };
}

pub(crate) use record_id;

record_id!(
    /// Identifies a [`Pin`] record.
    PinId
);

/// A user-placed marker and the pagination state of its photo search.
///
/// `discovered` is set exactly once, when the page count for this location has
/// been learned. Whether a pin is "new" is decided by this flag, never by
/// whether it happens to own photos at the moment.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct Pin {
    #[n(0)]
    pub id: PinId,
    #[n(1)]
    pub name: String,
    #[n(2)]
    pub coordinates: Coordinates,
    #[n(3)]
    pub total_pages: Option<u32>,
    #[n(4)]
    pub current_page: u32,
    #[n(5)]
    pub discovered: bool,
    /// Creation time in milliseconds since the Unix epoch.
    #[n(6)]
    pub created_at: i64,
}

impl Pin {
    pub fn new(name: impl Into<String>, coordinates: Coordinates) -> Self {
        Self {
            id: PinId::random(),
            name: name.into(),
            coordinates,
            total_pages: None,
            current_page: 1,
            discovered: false,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Records the outcome of page-count discovery.
    pub fn record_discovery(&mut self, discovery: Discovery) {
        self.total_pages = Some(discovery.total_pages());
        self.discovered = true;
    }

    /// True once discovery has run and found zero pages.
    pub fn has_no_photos_available(&self) -> bool {
        self.discovered && self.total_pages == Some(0)
    }

    /// Fails with [`FetchError::InvalidPage`] unless `page` is in `1..=total_pages`.
    ///
    /// An undiscovered pin has no valid pages.
    pub fn check_page(&self, page: u32) -> Result<(), FetchError> {
        let total_pages = self.total_pages.unwrap_or(0);
        if page == 0 || page > total_pages {
            return Err(FetchError::InvalidPage {
                requested: page,
                total_pages,
            });
        }
        Ok(())
    }

    /// The page a "new collection" request should fetch, without mutating the pin.
    pub fn peek_next_page(&self) -> Option<u32> {
        next_page(self.current_page, self.total_pages?)
    }

    /// Moves `current_page` forward, wrapping back to 1 after the last page.
    ///
    /// Returns the page to fetch next, or `None` when there are no pages.
    pub fn advance_page(&mut self) -> Option<u32> {
        let next = self.peek_next_page()?;
        self.current_page = next;
        Some(next)
    }
}

/// Cycles forward through `1..=total_pages`.
///
/// A current page at or past the end wraps to 1; zero pages yield `None`.
pub fn next_page(current_page: u32, total_pages: u32) -> Option<u32> {
    if total_pages == 0 {
        return None;
    }
    if current_page < total_pages {
        Some(current_page + 1)
    } else {
        Some(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pin_with(total_pages: u32, current_page: u32) -> Pin {
        let mut pin = Pin::new("Golden Gate", Coordinates::new(37.8199, -122.4783));
        pin.record_discovery(Discovery::from_total(total_pages));
        pin.current_page = current_page;
        pin
    }

    #[test]
    fn advance_wraps_after_last_page() {
        assert_eq!(next_page(5, 5), Some(1));
        assert_eq!(next_page(3, 5), Some(4));
        assert_eq!(next_page(1, 1), Some(1));
    }

    #[test]
    fn advance_past_end_wraps() {
        assert_eq!(next_page(7, 5), Some(1));
    }

    #[test]
    fn advance_with_no_pages_is_none() {
        assert_eq!(next_page(1, 0), None);

        let mut pin = pin_with(0, 1);
        assert_eq!(pin.advance_page(), None);
        assert_eq!(pin.current_page, 1);
        assert!(pin.has_no_photos_available());
    }

    #[test]
    fn advance_mutates_current_page() {
        let mut pin = pin_with(4, 2);
        assert_eq!(pin.peek_next_page(), Some(3));
        assert_eq!(pin.current_page, 2);
        assert_eq!(pin.advance_page(), Some(3));
        assert_eq!(pin.current_page, 3);
    }

    #[test]
    fn undiscovered_pin_cannot_advance() {
        let mut pin = Pin::new("Nowhere", Coordinates::new(0.0, 0.0));
        assert!(!pin.discovered);
        assert_eq!(pin.advance_page(), None);
    }

    #[test]
    fn check_page_rejects_out_of_range() {
        let pin = pin_with(3, 1);
        assert!(pin.check_page(1).is_ok());
        assert!(pin.check_page(3).is_ok());
        assert!(matches!(
            pin.check_page(4),
            Err(FetchError::InvalidPage {
                requested: 4,
                total_pages: 3
            })
        ));
        assert!(matches!(
            pin.check_page(0),
            Err(FetchError::InvalidPage { requested: 0, .. })
        ));
    }

    #[test]
    fn cbor_roundtrip_keeps_page_state() {
        let pin = pin_with(9, 4);
        let bytes = minicbor::to_vec(&pin).unwrap();
        let decoded: Pin = minicbor::decode(&bytes).unwrap();
        assert_eq!(decoded, pin);
    }
}

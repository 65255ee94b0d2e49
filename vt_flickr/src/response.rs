//! Decoding of search responses.
//!
//! A response is `{"photos": {"pages": N, "photo": [...]}, "stat": "ok"}`.
//! A rejected request comes back as `{"stat": "fail", "code": C, "message": M}`
//! with a success status, so the envelope is checked before anything else.

use serde::Deserialize;
use url::Url;
use vt_core::{Discovery, Page, ParseError, PhotoDescriptor};

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    stat: Option<String>,
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    photos: Option<Photos>,
}

#[derive(Debug, Deserialize)]
struct Photos {
    #[serde(default)]
    pages: Option<Count>,
    #[serde(default)]
    photo: Option<Vec<serde_json::Value>>,
}

/// The API has returned counts both as numbers and as numeric strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Count {
    Number(u64),
    Text(String),
}

impl Count {
    fn to_u32(&self) -> Option<u32> {
        match self {
            Count::Number(n) => u32::try_from(*n).ok(),
            Count::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// Ids arrive as strings, but tolerate numbers.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RemoteId {
    Text(String),
    Number(u64),
}

#[derive(Debug, Deserialize)]
struct Entry {
    url_m: String,
    id: RemoteId,
    title: String,
}

fn photos(body: &[u8]) -> Result<Photos, ParseError> {
    let envelope: Envelope = serde_json::from_slice(body)?;
    if envelope.stat.as_deref() == Some("fail") {
        return Err(ParseError::Rejected {
            code: envelope.code.unwrap_or_default(),
            message: envelope.message.unwrap_or_default(),
        });
    }
    envelope.photos.ok_or(ParseError::MissingField("photos"))
}

/// Reads `photos.pages` from a discovery response.
pub fn parse_page_count(body: &[u8]) -> Result<Discovery, ParseError> {
    let total = photos(body)?
        .pages
        .as_ref()
        .and_then(Count::to_u32)
        .ok_or(ParseError::MissingField("photos.pages"))?;
    Ok(Discovery::from_total(total))
}

/// Decodes `photos.photo` into descriptors, in response order.
///
/// Entries without a URL, id or title, or whose URL has no file name to
/// derive a cache key from, are counted in [`Page::skipped`].
pub fn parse_page(number: u32, body: &[u8]) -> Result<Page, ParseError> {
    let entries = photos(body)?
        .photo
        .ok_or(ParseError::MissingField("photos.photo"))?;

    let mut descriptors = Vec::with_capacity(entries.len());
    let mut skipped = 0;
    for value in entries {
        match descriptor(value) {
            Some(descriptor) => descriptors.push(descriptor),
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        tracing::debug!(page = number, skipped, "skipped malformed photo entries");
    }

    Ok(Page {
        number,
        descriptors,
        skipped,
    })
}

fn descriptor(value: serde_json::Value) -> Option<PhotoDescriptor> {
    let entry: Entry = serde_json::from_value(value).ok()?;
    let url = Url::parse(&entry.url_m).ok()?;
    let id = match entry.id {
        RemoteId::Text(id) => id,
        RemoteId::Number(id) => id.to_string(),
    };
    PhotoDescriptor::new(url, id, entry.title).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_count_from_number_or_string() {
        let body = br#"{"photos":{"page":1,"pages":3,"perpage":250,"total":"700","photo":[]},"stat":"ok"}"#;
        assert_eq!(parse_page_count(body).unwrap(), Discovery::Pages(3));

        let body = br#"{"photos":{"pages":"12"},"stat":"ok"}"#;
        assert_eq!(parse_page_count(body).unwrap(), Discovery::Pages(12));
    }

    #[test]
    fn zero_pages_is_empty_not_an_error() {
        let body = br#"{"photos":{"page":1,"pages":0,"perpage":250,"total":0,"photo":[]},"stat":"ok"}"#;
        assert_eq!(parse_page_count(body).unwrap(), Discovery::Empty);
    }

    #[test]
    fn missing_pages_is_a_parse_error() {
        let err = parse_page_count(br#"{"photos":{},"stat":"ok"}"#).unwrap_err();
        assert!(matches!(err, ParseError::MissingField("photos.pages")));

        let err = parse_page_count(br#"{"stat":"ok"}"#).unwrap_err();
        assert!(matches!(err, ParseError::MissingField("photos")));
    }

    #[test]
    fn garbage_is_a_json_error() {
        let err = parse_page_count(b"<html>502 Bad Gateway</html>").unwrap_err();
        assert!(matches!(err, ParseError::Json(_)));
    }

    #[test]
    fn rejection_envelope() {
        let body = br#"{"stat":"fail","code":100,"message":"Invalid API Key (Key has invalid format)"}"#;
        match parse_page(1, body).unwrap_err() {
            ParseError::Rejected { code, message } => {
                assert_eq!(code, 100);
                assert!(message.starts_with("Invalid API Key"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn page_keeps_response_order() {
        let body = br#"{"photos":{"pages":2,"photo":[
            {"id":"1","title":"first","url_m":"https://live.staticflickr.com/1/a_m.jpg"},
            {"id":"2","title":"second","url_m":"https://live.staticflickr.com/1/b_m.jpg"},
            {"id":3,"title":"","url_m":"https://live.staticflickr.com/1/c_m.jpg"}
        ]},"stat":"ok"}"#;
        let page = parse_page(2, body).unwrap();

        assert_eq!(page.number, 2);
        assert_eq!(page.skipped, 0);
        assert!(page.partial().is_none());
        let ids: Vec<_> = page.descriptors.iter().map(|d| d.remote_id.as_str()).collect();
        assert_eq!(ids, ["1", "2", "3"]);
        assert_eq!(page.descriptors[1].cache_key.as_str(), "b_m.jpg");
    }

    #[test]
    fn malformed_entries_are_skipped() {
        let body = br#"{"photos":{"pages":1,"photo":[
            {"id":"1","title":"ok","url_m":"https://live.staticflickr.com/1/a_m.jpg"},
            {"id":"2","title":"no url"},
            {"id":"3","url_m":"https://live.staticflickr.com/1/c_m.jpg"},
            {"title":"no id","url_m":"https://live.staticflickr.com/1/d_m.jpg"},
            {"id":"5","title":"no file name","url_m":"https://live.staticflickr.com/"},
            {"id":"6","title":"not a url","url_m":"::::"},
            "not even an object"
        ]},"stat":"ok"}"#;
        let page = parse_page(1, body).unwrap();

        assert_eq!(page.descriptors.len(), 1);
        assert_eq!(page.skipped, 6);
        let partial = page.partial().unwrap();
        assert_eq!(partial.accepted, 1);
        assert_eq!(partial.skipped, 6);
    }

    #[test]
    fn empty_photo_array_is_valid() {
        let page = parse_page(4, br#"{"photos":{"pages":4,"photo":[]},"stat":"ok"}"#).unwrap();
        assert!(page.descriptors.is_empty());
        assert_eq!(page.skipped, 0);
    }

    #[test]
    fn missing_photo_array_is_a_parse_error() {
        let err = parse_page(1, br#"{"photos":{"pages":1},"stat":"ok"}"#).unwrap_err();
        assert!(matches!(err, ParseError::MissingField("photos.photo")));
    }
}

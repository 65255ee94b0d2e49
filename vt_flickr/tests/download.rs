use bytes::Bytes;
use std::{sync::Arc, time::Duration};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use vt_cache_memory::MemoryStore;
use vt_core::{ImageCache, NetworkError, Photo, PhotoDescriptor, PinId};
use vt_flickr::{DownloadPolicy, Downloader, testutil::ScriptedHttp};

const URL: &str = "https://live.staticflickr.com/65535/42_cafe_m.jpg";

fn photo(url: &str) -> Photo {
    let descriptor = PhotoDescriptor::new(url.parse().unwrap(), "42", "Coit Tower").unwrap();
    Photo::from_descriptor(PinId::random(), &descriptor)
}

fn downloader(http: Arc<ScriptedHttp>, policy: DownloadPolicy) -> Downloader {
    let cache = ImageCache::new(MemoryStore::new(), MemoryStore::new());
    Downloader::new(http, cache, policy)
}

#[tokio::test]
async fn success_lands_in_cache() {
    let http = Arc::new(ScriptedHttp::new());
    http.respond(URL, Bytes::from_static(b"jpeg bytes"));
    let downloader = downloader(http, DownloadPolicy::default());
    let photo = photo(URL);

    let bytes = downloader.download(&photo).join().await.unwrap().unwrap();
    assert_eq!(bytes.as_ref(), b"jpeg bytes");
    assert_eq!(
        downloader.cache().get(&photo.cache_key).await.unwrap(),
        Some(bytes)
    );
}

#[tokio::test]
async fn failure_writes_nothing() {
    let http = Arc::new(ScriptedHttp::new());
    http.fail(URL, 404);
    let downloader = downloader(http, DownloadPolicy::default());
    let photo = photo(URL);

    let err = downloader.download(&photo).join().await.unwrap().unwrap_err();
    assert!(matches!(err, NetworkError::Status { status: 404, .. }));
    assert!(!downloader.cache().contains(&photo.cache_key).await.unwrap());
}

#[tokio::test]
async fn cancel_before_completion_suppresses_result_and_cache_write() {
    let http = Arc::new(ScriptedHttp::new());
    http.respond(URL, Bytes::from_static(b"stale"));
    let gate = http.hold(URL);
    let downloader = downloader(http, DownloadPolicy::default());
    let photo = photo(URL);

    let handle = downloader.download(&photo);
    handle.cancel();
    handle.cancel();
    gate.release();

    assert!(handle.is_cancelled());
    assert!(handle.join().await.is_none());
    assert!(!downloader.cache().contains(&photo.cache_key).await.unwrap());
}

#[tokio::test]
async fn cancel_after_completion_is_a_no_op() {
    let http = Arc::new(ScriptedHttp::serving(Bytes::from_static(b"img")));
    let downloader = downloader(http, DownloadPolicy::default());
    let photo = photo(URL);

    let handle = downloader.download(&photo);
    while !handle.is_finished() {
        tokio::task::yield_now().await;
    }
    handle.cancel();

    assert!(!handle.is_cancelled());
    assert!(handle.join().await.unwrap().is_ok());
    assert!(downloader.cache().contains(&photo.cache_key).await.unwrap());
}

#[tokio::test]
async fn parent_token_cancels_scoped_downloads() {
    let http = Arc::new(ScriptedHttp::new());
    let gate = http.hold(URL);
    let downloader = downloader(http, DownloadPolicy::default());
    let photo = photo(URL);

    let pin_token = CancellationToken::new();
    let handle = downloader.download_scoped(&photo, &pin_token);
    pin_token.cancel();
    gate.release();

    assert!(handle.join().await.is_none());
    assert!(!downloader.cache().contains(&photo.cache_key).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried() {
    let http = Arc::new(ScriptedHttp::new());
    http.fail(URL, 503);
    http.fail(URL, 503);
    http.respond(URL, Bytes::from_static(b"third time"));
    let downloader = downloader(
        http.clone(),
        DownloadPolicy {
            retries: 2,
            backoff: Duration::from_millis(100),
            ..Default::default()
        },
    );

    let bytes = downloader.download(&photo(URL)).join().await.unwrap().unwrap();
    assert_eq!(bytes.as_ref(), b"third time");
    assert_eq!(http.call_count(URL), 3);
}

#[tokio::test(start_paused = true)]
async fn permanent_failures_are_not_retried() {
    let http = Arc::new(ScriptedHttp::new());
    http.fail(URL, 404);
    let downloader = downloader(
        http.clone(),
        DownloadPolicy {
            retries: 3,
            ..Default::default()
        },
    );

    assert!(downloader.download(&photo(URL)).join().await.unwrap().is_err());
    assert_eq!(http.call_count(URL), 1);
}

#[tokio::test]
async fn one_failure_does_not_affect_siblings() {
    let bad = "https://live.staticflickr.com/65535/bad_m.jpg";
    let http = Arc::new(ScriptedHttp::serving(Bytes::from_static(b"ok")));
    http.fail(bad, 500);
    let downloader = downloader(http, DownloadPolicy::default());

    let photos: Vec<_> = (0..4)
        .map(|i| photo(&format!("https://live.staticflickr.com/65535/{i}_m.jpg")))
        .chain([photo(bad)])
        .collect();
    let handles: Vec<_> = photos.iter().map(|p| downloader.download(p)).collect();

    let mut ok = 0;
    let mut failed = 0;
    for handle in handles {
        match handle.join().await {
            Some(Ok(_)) => ok += 1,
            Some(Err(_)) => failed += 1,
            None => unreachable!("nothing was cancelled"),
        }
    }
    assert_eq!((ok, failed), (4, 1));
}

#[tokio::test]
async fn tracked_downloads_are_awaited_by_their_tracker() {
    let http = Arc::new(ScriptedHttp::serving(Bytes::from_static(b"img")));
    let gate = http.hold(URL);
    let downloader = downloader(http, DownloadPolicy::default());
    let photo = photo(URL);
    let owner = CancellationToken::new();
    let tracker = TaskTracker::new();

    let handle = downloader.download_tracked(&photo, &owner, &tracker);
    tracker.close();
    assert!(!tracker.is_empty());

    owner.cancel();
    gate.release();
    tracker.wait().await;

    assert!(handle.is_finished());
    assert!(handle.join().await.is_none());
    assert!(!downloader.cache().contains(&photo.cache_key).await.unwrap());
}

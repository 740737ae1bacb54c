//! Integration test: the persistent download queue dedups by backend URL.

mod init_logging;

use weft::store::DownloadJob;
use weft::SqliteStore;

#[tokio::test]
async fn enqueue_twice_pop_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = SqliteStore::open(dir.path().join("queue.db")).expect("open");

    store
        .enqueue_download(DownloadJob {
            backend_url: "http://backend-a:11434".into(),
            model: "modelX".into(),
        })
        .await
        .expect("first enqueue");
    store
        .enqueue_download(DownloadJob {
            backend_url: "http://backend-a:11434".into(),
            model: "modelX".into(),
        })
        .await
        .expect("second enqueue silently succeeds");

    let first = store.pop_download().await.expect("pop");
    assert_eq!(
        first,
        Some(DownloadJob {
            backend_url: "http://backend-a:11434".into(),
            model: "modelX".into(),
        })
    );

    let second = store.pop_download().await.expect("pop");
    assert!(second.is_none(), "second pop yields empty");
}

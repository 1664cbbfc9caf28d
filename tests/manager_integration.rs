//! Integration tests for the download manager lifecycle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use offline_core::content::{DownloadableContent, HtmlSnippet, WebPage};
use offline_core::download::HttpClient;
use offline_core::entry::{Entry, EntryKey, EntryStatus};
use offline_core::manager::{DownloadEvent, DownloadManager, StartOutcome};
use offline_core::storage::{MemoryStorage, SqliteStorage, StorageGateway, save_entry};
use offline_core::video::ResolverRegistry;
use offline_core::CaptureConfig;
use tempfile::TempDir;
use tokio::time::timeout;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const WAIT: Duration = Duration::from_secs(10);

fn manager(temp: &TempDir, storage: Arc<dyn StorageGateway>, max_active: usize) -> DownloadManager {
    DownloadManager::new(
        CaptureConfig::new(temp.path()).with_max_active(max_active),
        storage,
        ResolverRegistry::new(),
        HttpClient::new(),
    )
    .expect("valid config")
}

fn snippet(id: &str, html: String, server: &MockServer) -> Arc<dyn DownloadableContent> {
    Arc::new(HtmlSnippet::new(id, "page", html, Some(server.uri())))
}

async fn slow_image(server: &MockServer, route: &str, delay: Duration) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"IMG".to_vec())
                .set_delay(delay),
        )
        .mount(server)
        .await;
}

async fn wait_idle(manager: &DownloadManager) {
    timeout(WAIT, manager.wait_idle())
        .await
        .expect("pipelines should finish");
}

#[tokio::test]
async fn test_fourth_entry_waits_for_a_free_slot() {
    let server = MockServer::start().await;
    slow_image(&server, "/slow.png", Duration::from_millis(300)).await;
    let temp = TempDir::new().unwrap();
    let manager = manager(&temp, Arc::new(MemoryStorage::new()), 3);

    let peak = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicBool::new(false));
    let sampler = {
        let manager = manager.clone();
        let peak = Arc::clone(&peak);
        let done = Arc::clone(&done);
        tokio::spawn(async move {
            while !done.load(Ordering::SeqCst) {
                peak.fetch_max(manager.active_count(), Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
    };

    for id in ["1", "2", "3", "4"] {
        assert!(manager.add_and_start(snippet(id, r#"<img src="/slow.png">"#.into(), &server)));
    }

    let fourth = EntryKey::new("4", "page");
    assert_eq!(manager.active_count(), 3);
    assert_eq!(manager.status(&fourth), Some(EntryStatus::Initialized));
    assert!(manager.entries()[3].queued);
    assert_eq!(manager.start(&fourth), StartOutcome::Queued);

    wait_idle(&manager).await;
    done.store(true, Ordering::SeqCst);
    sampler.await.unwrap();

    assert!(peak.load(Ordering::SeqCst) <= 3);
    for snapshot in manager.entries() {
        assert_eq!(snapshot.status, EntryStatus::Completed, "{}", snapshot.key);
        assert!(!snapshot.queued);
    }
}

#[tokio::test]
async fn test_status_events_follow_lifecycle() {
    let server = MockServer::start().await;
    slow_image(&server, "/a.png", Duration::from_millis(10)).await;
    let temp = TempDir::new().unwrap();
    let manager = manager(&temp, Arc::new(MemoryStorage::new()), 1);
    let mut events = manager.subscribe();

    manager.add_and_start(snippet("1", r#"<img src="/a.png">"#.into(), &server));
    wait_idle(&manager).await;

    let mut statuses = Vec::new();
    let mut last_progress = 0.0;
    while let Ok(event) = events.try_recv() {
        match event {
            DownloadEvent::StatusChanged { status, .. } => statuses.push(status),
            DownloadEvent::ProgressChanged { progress, .. } => last_progress = progress,
            DownloadEvent::Failed { message, .. } => panic!("unexpected failure: {message}"),
        }
    }
    assert_eq!(
        statuses,
        vec![EntryStatus::Preparing, EntryStatus::Active, EntryStatus::Completed]
    );
    assert!((last_progress - 1.0_f64).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_pause_then_resume_completes() {
    let server = MockServer::start().await;
    slow_image(&server, "/slow.png", Duration::from_millis(500)).await;
    let temp = TempDir::new().unwrap();
    let manager = manager(&temp, Arc::new(MemoryStorage::new()), 2);
    let key = EntryKey::new("1", "page");

    manager.add_and_start(snippet("1", r#"<img src="/slow.png">"#.into(), &server));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(manager.pause(&key).await);
    wait_idle(&manager).await;

    assert_eq!(manager.status(&key), Some(EntryStatus::Paused));
    assert_eq!(manager.active_count(), 0);

    assert_eq!(manager.resume(&key), StartOutcome::Started);
    wait_idle(&manager).await;
    assert_eq!(manager.status(&key), Some(EntryStatus::Completed));
}

#[tokio::test]
async fn test_cancel_returns_to_initialized_and_keeps_links() {
    let server = MockServer::start().await;
    slow_image(&server, "/fast.png", Duration::from_millis(0)).await;
    slow_image(&server, "/slow.png", Duration::from_secs(3)).await;
    let temp = TempDir::new().unwrap();
    let storage = Arc::new(MemoryStorage::new());
    let manager = manager(&temp, storage.clone(), 1);
    let key = EntryKey::new("1", "page");
    let mut events = manager.subscribe();

    manager.add_and_start(snippet(
        "1",
        r#"<img src="/fast.png"><img src="/slow.png">"#.into(),
        &server,
    ));
    timeout(WAIT, async {
        loop {
            if let Ok(DownloadEvent::ProgressChanged { progress, .. }) = events.recv().await {
                if progress >= 0.5 {
                    break;
                }
            }
        }
    })
    .await
    .expect("first link should finish");

    assert!(manager.cancel(&key).await);
    wait_idle(&manager).await;

    assert_eq!(manager.status(&key), Some(EntryStatus::Initialized));
    assert_eq!(manager.progress(&key), Some(0.5));
    let entry = manager.entry(&key).unwrap();
    assert_eq!(entry.downloaded_links(), 1);
    let stored: Entry = serde_json::from_str(&storage.get("1", "page").unwrap()).unwrap();
    assert_eq!(stored.status, EntryStatus::Initialized);
}

#[tokio::test]
async fn test_failed_entry_can_be_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/site.css"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/css")
                .set_body_string("a { background: url(oops.png }"),
        )
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/site.css"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/css")
                .set_body_string("a { color: red; }"),
        )
        .mount(&server)
        .await;
    let temp = TempDir::new().unwrap();
    let manager = manager(&temp, Arc::new(MemoryStorage::new()), 1);
    let key = EntryKey::new("1", "page");
    let mut events = manager.subscribe();

    manager.add_and_start(snippet("1", r#"<link rel="stylesheet" href="/site.css">"#.into(), &server));
    wait_idle(&manager).await;

    assert_eq!(manager.status(&key), Some(EntryStatus::Failed));
    let mut failure = None;
    while let Ok(event) = events.try_recv() {
        if let DownloadEvent::Failed { message, .. } = event {
            failure = Some(message);
        }
    }
    assert!(failure.is_some());
    assert!(manager.entries()[0].last_error.is_some());
    assert_eq!(manager.start(&key), StartOutcome::NotStartable(EntryStatus::Failed));

    assert_eq!(manager.retry(&key), StartOutcome::Started);
    wait_idle(&manager).await;
    assert_eq!(manager.status(&key), Some(EntryStatus::Completed));
    assert!(manager.entries()[0].last_error.is_none());
}

#[tokio::test]
async fn test_remove_running_entry_cleans_up() {
    let server = MockServer::start().await;
    slow_image(&server, "/slow.png", Duration::from_secs(3)).await;
    let temp = TempDir::new().unwrap();
    let storage = Arc::new(MemoryStorage::new());
    let manager = manager(&temp, storage.clone(), 1);
    let key = EntryKey::new("1", "page");

    manager.add_and_start(snippet("1", r#"<img src="/slow.png">"#.into(), &server));
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(timeout(WAIT, manager.remove(&key)).await.unwrap().unwrap());
    assert_eq!(manager.status(&key), None);
    assert!(storage.get("1", "page").is_none());
    assert!(!temp.path().join("page/1").exists());
    assert_eq!(manager.active_count(), 0);
}

#[tokio::test]
async fn test_sqlite_state_survives_restart() {
    let server = MockServer::start().await;
    slow_image(&server, "/a.png", Duration::from_millis(0)).await;
    let temp = TempDir::new().unwrap();
    let db_path = temp.path().join("state.db");

    {
        let storage = Arc::new(SqliteStorage::new(&db_path).await.unwrap());
        let manager = manager(&temp, storage.clone(), 2);
        manager.add_and_start(snippet("done", r#"<img src="/a.png">"#.into(), &server));
        wait_idle(&manager).await;
        manager.close().await;

        let mut interrupted = Entry::new("half", "page", Vec::new());
        interrupted.status = EntryStatus::Active;
        save_entry(storage.as_ref(), &interrupted).await.unwrap();
    }

    let storage = Arc::new(SqliteStorage::new(&db_path).await.unwrap());
    let manager = manager(&temp, storage, 2);
    let uri = server.uri();
    let restored = manager
        .restore("page", |entry| {
            let html = if entry.id == "half" { r#"<img src="/a.png">"# } else { "" };
            Some(Arc::new(HtmlSnippet::new(entry.id.clone(), "page", html, Some(uri.clone())))
                as Arc<dyn DownloadableContent>)
        })
        .await
        .unwrap();

    assert_eq!(restored, 2);
    let done = EntryKey::new("done", "page");
    let half = EntryKey::new("half", "page");
    assert_eq!(manager.status(&done), Some(EntryStatus::Completed));
    assert_eq!(manager.status(&half), Some(EntryStatus::Paused));
    assert_eq!(manager.entry(&done).unwrap().downloaded_links(), 1);

    assert_eq!(manager.start(&half), StartOutcome::Started);
    wait_idle(&manager).await;
    assert_eq!(manager.status(&half), Some(EntryStatus::Completed));
}

#[tokio::test]
async fn test_web_page_capture_fetches_html() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/lesson"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_string(r#"<h1>Lesson</h1><img src="diagram.png">"#),
        )
        .expect(1)
        .mount(&server)
        .await;
    slow_image(&server, "/diagram.png", Duration::from_millis(0)).await;

    let temp = TempDir::new().unwrap();
    let manager = manager(&temp, Arc::new(MemoryStorage::new()), 1);
    let url = Url::parse(&format!("{}/lesson", server.uri())).unwrap();
    let page = Arc::new(WebPage::with_id("lesson", url, HttpClient::new()));
    let key = page.key();

    manager.add_and_start(page);
    wait_idle(&manager).await;

    assert_eq!(manager.status(&key), Some(EntryStatus::Completed));
    let index = std::fs::read_to_string(temp.path().join("web_page/lesson/index.html")).unwrap();
    assert!(index.starts_with("<h1>Lesson</h1>"));
    assert!(!index.contains(r#"src="diagram.png""#));
    assert!(index.contains("/diagram.png\""));
}

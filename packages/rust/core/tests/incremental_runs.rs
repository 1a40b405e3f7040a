//! End-to-end runs against a mock legal-document site.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use lexcrawl_core::{Coordinator, RunOptions, SilentProgress};
use lexcrawl_shared::{
    AppConfig, DocId, ExtractionRules, FetchStrategy, Result, RunManifest, RunMode, RunStatus,
    SourceConfig,
};
use lexcrawl_storage::{Storage, WriteCommand};
use lexcrawl_text::{LanguageToolkit, Normalizer, RuleBasedToolkit, Token};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn temp_db() -> PathBuf {
    std::env::temp_dir().join(format!("lexcrawl_test_{}.db", Uuid::now_v7()))
}

fn base_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.crawl.allow_private_hosts = true;
    config.crawl.politeness_delay_ms = 0;
    config.crawl.backoff_base_ms = 10;
    config.crawl.backoff_max_ms = 50;
    config.crawl.max_threads = 2;
    config
}

fn listing_source(server: &MockServer) -> SourceConfig {
    SourceConfig {
        id: "source-a".into(),
        name: "Source A".into(),
        language: Some("fa".into()),
        active: true,
        strategy: FetchStrategy::Listing {
            listing_url: format!("{}/laws", server.uri()),
            link_selector: "ul.laws a".into(),
            next_page_selector: None,
            document_pattern: None,
        },
        rules: ExtractionRules {
            body: Some("div.law-text".into()),
            ..ExtractionRules::default()
        },
    }
}

fn listing_page(ids: &[u32]) -> String {
    let items: String = ids
        .iter()
        .map(|i| format!(r#"<li><a href="/law/{i}">قانون {i}</a></li>"#))
        .collect();
    format!("<html><body><ul class=\"laws\">{items}</ul></body></html>")
}

fn law_page(id: u32, text: &str) -> String {
    format!(
        r#"<html><head><title>قانون شماره {id} | پایگاه قوانین</title></head>
<body><nav>خانه</nav><div class="law-text"><h2>فصل اول</h2><p>{text}</p></div></body></html>"#
    )
}

async fn mount_site(server: &MockServer, docs: &[(u32, &str)]) {
    let ids: Vec<u32> = docs.iter().map(|(id, _)| *id).collect();
    Mock::given(method("GET"))
        .and(path("/laws"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_page(&ids)))
        .mount(server)
        .await;
    for (id, text) in docs {
        Mock::given(method("GET"))
            .and(path(format!("/law/{id}")))
            .respond_with(ResponseTemplate::new(200).set_body_string(law_page(*id, text)))
            .mount(server)
            .await;
    }
}

async fn run(
    db: &Path,
    config: &AppConfig,
    options: RunOptions,
    normalizer: Option<Normalizer>,
) -> RunManifest {
    let storage = Storage::open(db).await.expect("open db");
    let mut coordinator = Coordinator::new(config.clone(), storage);
    if let Some(normalizer) = normalizer {
        coordinator = coordinator.with_normalizer(normalizer);
    }
    coordinator
        .run(&options, Arc::new(SilentProgress))
        .await
        .expect("run")
}

fn doc_id(server: &MockServer, id: u32) -> DocId {
    DocId::parse(&format!("{}/law/{id}", server.uri())).unwrap()
}

/// Rule-based toolkit that counts its invocations.
struct CountingToolkit {
    inner: RuleBasedToolkit,
    calls: AtomicUsize,
}

impl LanguageToolkit for CountingToolkit {
    fn tokenize_and_lemmatize(&self, text: &str, language: &str) -> Result<Vec<Token>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.tokenize_and_lemmatize(text, language)
    }

    fn model_version(&self) -> &str {
        self.inner.model_version()
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn full_then_incremental_detects_the_changed_document() {
    let server = MockServer::start().await;
    mount_site(
        &server,
        &[
            (1, "ماده ۱ - متن اول"),
            (2, "ماده ۲ - متن دوم"),
            (3, "ماده ۳ - متن سوم"),
        ],
    )
    .await;

    let db = temp_db();
    let mut config = base_config();
    config.sources = vec![listing_source(&server)];

    let full = run(&db, &config, RunOptions::new(RunMode::Full), None).await;
    assert_eq!(full.status, RunStatus::Done);
    assert_eq!(
        (full.counts.new, full.counts.changed, full.counts.unchanged, full.counts.failed),
        (3, 0, 0, 0)
    );
    // listing page plus three documents
    assert_eq!(full.counts.fetched, 4);

    server.reset().await;
    mount_site(
        &server,
        &[
            (1, "ماده ۱ - متن اول"),
            (2, "ماده ۲ - متن اصلاح شده"),
            (3, "ماده ۳ - متن سوم"),
        ],
    )
    .await;

    let incremental = run(&db, &config, RunOptions::new(RunMode::Incremental), None).await;
    assert_eq!(incremental.status, RunStatus::Done);
    assert_eq!(
        (
            incremental.counts.new,
            incremental.counts.changed,
            incremental.counts.unchanged,
            incremental.counts.failed
        ),
        (0, 1, 2, 0)
    );

    let storage = Storage::open(&db).await.unwrap();
    let record = storage
        .get_fingerprint(&doc_id(&server, 2))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.version, 2);

    let doc = storage
        .get_document(&doc_id(&server, 2))
        .await
        .unwrap()
        .unwrap();
    assert!(doc.body.contains("متن اصلاح شده"));
    assert_eq!(doc.fingerprint, record.fingerprint);
    assert_eq!(doc.title, "قانون شماره 2");
    assert_eq!(doc.sections, vec!["فصل اول"]);
    assert!(!doc.body.contains("خانه"));

    for id in [1, 3] {
        let record = storage
            .get_fingerprint(&doc_id(&server, id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.version, 1);
        assert!(record.last_seen_at > record.last_changed_at);
    }

    let latest = storage.latest_run_manifest().await.unwrap().unwrap();
    assert_eq!(latest.id, incremental.id);
}

#[tokio::test]
async fn unchanged_documents_skip_extraction_and_normalization() {
    let server = MockServer::start().await;
    mount_site(&server, &[(1, "ماده ۱"), (2, "ماده ۲"), (3, "ماده ۳")]).await;

    let toolkit = Arc::new(CountingToolkit {
        inner: RuleBasedToolkit::new(),
        calls: AtomicUsize::new(0),
    });
    let normalizer = Normalizer::new(toolkit.clone());

    let db = temp_db();
    let mut config = base_config();
    config.sources = vec![listing_source(&server)];

    run(&db, &config, RunOptions::new(RunMode::Full), Some(normalizer.clone())).await;
    assert_eq!(toolkit.calls.load(Ordering::SeqCst), 3);

    let before = Storage::open(&db).await.unwrap().list_documents().await.unwrap();

    let second = run(
        &db,
        &config,
        RunOptions::new(RunMode::Incremental),
        Some(normalizer),
    )
    .await;
    assert_eq!(second.counts.unchanged, 3);
    assert_eq!(toolkit.calls.load(Ordering::SeqCst), 3);

    // documents untouched; only last_seen moved
    let after = Storage::open(&db).await.unwrap().list_documents().await.unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn timed_out_document_fails_once_and_run_completes() {
    let server = MockServer::start().await;
    mount_site(&server, &[(1, "ماده ۱"), (2, "ماده ۲")]).await;
    Mock::given(method("GET"))
        .and(path("/laws"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_page(&[1, 2, 3])))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/law/3"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(law_page(3, "ماده ۳"))
                .set_delay(std::time::Duration::from_secs(3)),
        )
        .expect(3)
        .mount(&server)
        .await;

    let db = temp_db();
    let mut config = base_config();
    config.crawl.request_timeout_secs = 1;
    config.crawl.max_attempts = 3;
    config.sources = vec![listing_source(&server)];

    let manifest = run(&db, &config, RunOptions::new(RunMode::Full), None).await;
    assert_eq!(manifest.status, RunStatus::Done);
    assert_eq!(manifest.counts.failed, 1);
    assert_eq!(manifest.counts.new, 2);

    let storage = Storage::open(&db).await.unwrap();
    let errors = storage.list_target_errors(&manifest.id).await.unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, "transient_fetch");
    assert!(errors[0].url.ends_with("/law/3"));
}

#[tokio::test]
async fn recreate_with_seed_is_idempotent() {
    let server = MockServer::start().await;
    mount_site(&server, &[(1, "ماده ۱"), (2, "ماده ۲"), (3, "ماده ۳")]).await;

    let seed_path = std::env::temp_dir().join(format!("lexcrawl_seed_{}.json", Uuid::now_v7()));
    let seed = serde_json::json!({ "sources": [listing_source(&server)] });
    std::fs::write(&seed_path, seed.to_string()).unwrap();

    let db = temp_db();
    let config = base_config();
    let options = RunOptions {
        mode: RunMode::Recreate,
        seed_file: Some(seed_path),
    };

    type Snapshot = Vec<(String, String, u32, String, Vec<String>)>;
    async fn snapshot(db: &Path) -> Snapshot {
        let storage = Storage::open(db).await.unwrap();
        let records = storage.list_fingerprints().await.unwrap();
        let docs: HashMap<_, _> = storage
            .list_documents()
            .await
            .unwrap()
            .into_iter()
            .map(|d| (d.doc_id.clone(), d))
            .collect();
        records
            .into_iter()
            .map(|r| {
                let doc = &docs[&r.doc_id];
                (
                    r.doc_id.to_string(),
                    r.fingerprint.to_string(),
                    r.version,
                    doc.body.clone(),
                    doc.tokens.clone(),
                )
            })
            .collect()
    }

    let first = run(&db, &config, options.clone(), None).await;
    assert_eq!(first.counts.new, 3);
    let after_first = snapshot(&db).await;

    let second = run(&db, &config, options, None).await;
    assert_eq!(second.counts.new, 3);
    assert_eq!(second.mode, RunMode::Recreate);
    let after_second = snapshot(&db).await;

    assert_eq!(after_first.len(), 3);
    assert_eq!(after_first, after_second);
    assert!(after_second.iter().all(|(_, _, version, _, _)| *version == 1));
}

#[tokio::test]
async fn concurrent_workers_never_fetch_an_identity_twice() {
    let server = MockServer::start().await;
    // every page links to every other page, with fragments and duplicates
    let ids: Vec<u32> = (1..=12).collect();
    let links: String = ids
        .iter()
        .map(|i| format!(r#"<a href="/law/{i}">x</a><a href="/law/{i}#p2">y</a>"#))
        .collect();
    Mock::given(method("GET"))
        .and(path("/laws"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(format!("<html><body><ul class=\"laws\">{links}</ul></body></html>")),
        )
        .mount(&server)
        .await;
    for i in &ids {
        Mock::given(method("GET"))
            .and(path(format!("/law/{i}")))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                r#"<html><body><div class="law-text"><p>ماده {i}</p>{links}</div></body></html>"#
            )))
            .mount(&server)
            .await;
    }

    let mut source = listing_source(&server);
    source.rules.follow_links = true;
    let mut config = base_config();
    config.crawl.max_threads = 6;
    config.sources = vec![source];

    let manifest = run(&temp_db(), &config, RunOptions::new(RunMode::Full), None).await;
    assert_eq!(manifest.status, RunStatus::Done);
    assert_eq!(manifest.counts.new, 12);

    let mut hits: HashMap<String, usize> = HashMap::new();
    for request in server.received_requests().await.unwrap() {
        *hits.entry(request.url.path().to_string()).or_default() += 1;
    }
    // listing, twelve documents, and robots.txt fetched once for the host
    assert_eq!(hits.len(), 14);
    assert!(hits.contains_key("/robots.txt"));
    assert!(hits.values().all(|count| *count == 1), "{hits:?}");
}

fn requests_for(requests: &[wiremock::Request], p: &str) -> usize {
    requests.iter().filter(|r| r.url.path() == p).count()
}

#[tokio::test]
async fn incremental_rechecks_documents_no_longer_listed() {
    let server = MockServer::start().await;
    mount_site(&server, &[(1, "ماده ۱"), (2, "ماده ۲"), (3, "ماده ۳")]).await;

    let db = temp_db();
    let mut config = base_config();
    config.sources = vec![listing_source(&server)];
    run(&db, &config, RunOptions::new(RunMode::Full), None).await;

    // the listing drops doc 3, which is still served
    server.reset().await;
    mount_site(&server, &[(1, "ماده ۱"), (2, "ماده ۲")]).await;
    Mock::given(method("GET"))
        .and(path("/law/3"))
        .respond_with(ResponseTemplate::new(200).set_body_string(law_page(3, "ماده ۳ - اصلاحی")))
        .mount(&server)
        .await;

    let incremental = run(&db, &config, RunOptions::new(RunMode::Incremental), None).await;
    assert_eq!(incremental.status, RunStatus::Done);
    assert_eq!(
        (incremental.counts.new, incremental.counts.changed, incremental.counts.unchanged),
        (0, 1, 2)
    );
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests_for(&requests, "/law/3"), 1);

    let storage = Storage::open(&db).await.unwrap();
    let record = storage
        .get_fingerprint(&doc_id(&server, 3))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.version, 2);

    // a full run only follows the listing
    server.reset().await;
    mount_site(&server, &[(1, "ماده ۱"), (2, "ماده ۲")]).await;
    let full = run(&db, &config, RunOptions::new(RunMode::Full), None).await;
    assert_eq!(full.counts.unchanged, 2);
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests_for(&requests, "/law/3"), 0);
}

#[tokio::test]
async fn recheck_interval_requeues_only_stale_records() {
    let server = MockServer::start().await;
    mount_site(&server, &[(1, "ماده ۱"), (2, "ماده ۲")]).await;

    let db = temp_db();
    let mut config = base_config();
    config.sources = vec![listing_source(&server)];
    run(&db, &config, RunOptions::new(RunMode::Full), None).await;

    // doc 1 was last seen two days ago, doc 2 just now
    let storage = Storage::open(&db).await.unwrap();
    storage
        .apply_commit(&WriteCommand::Touch {
            doc_id: doc_id(&server, 1),
            seen_at: Utc::now() - chrono::Duration::hours(48),
        })
        .await
        .unwrap();
    drop(storage);

    // the listing no longer links either document, so only re-checks fetch them
    server.reset().await;
    mount_site(&server, &[]).await;
    for id in [1, 2] {
        Mock::given(method("GET"))
            .and(path(format!("/law/{id}")))
            .respond_with(ResponseTemplate::new(200).set_body_string(law_page(id, "متن")))
            .mount(&server)
            .await;
    }

    config.crawl.recheck_interval_hours = Some(24);
    let incremental = run(&db, &config, RunOptions::new(RunMode::Incremental), None).await;
    assert_eq!(incremental.status, RunStatus::Done);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests_for(&requests, "/law/1"), 1);
    assert_eq!(requests_for(&requests, "/law/2"), 0);
    assert_eq!(incremental.counts.changed, 1);

    let storage = Storage::open(&db).await.unwrap();
    let stale = storage
        .get_fingerprint(&doc_id(&server, 1))
        .await
        .unwrap()
        .unwrap();
    assert!(stale.last_seen_at > Utc::now() - chrono::Duration::hours(1));
}

//! End-to-end refresh runs against mock HTTP feeds.
//!
//! Each test creates its own in-memory SQLite database and wiremock server.
//! Feeds are fetched over real HTTP so the fetcher, parser, dedup filter,
//! writer and orchestrator are exercised together.

use pretty_assertions::assert_eq;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use feedfan::feed::{HttpFetcher, MAX_FEED_SIZE};
use feedfan::ingest::{FeedOutcome, RefreshOptions, RefreshRequest, Refresher, RunReport};
use feedfan::storage::{Database, EntryStatus};

async fn test_db() -> Database {
    Database::open(":memory:").await.unwrap()
}

fn refresher(db: Database) -> Refresher<HttpFetcher> {
    let fetcher = HttpFetcher::new(Duration::from_secs(2), MAX_FEED_SIZE).unwrap();
    Refresher::new(db, fetcher, RefreshOptions::default())
}

fn rss(items: &[(&str, &str)]) -> String {
    let items: String = items
        .iter()
        .map(|(title, link)| {
            format!(
                "<item><title>{title}</title><link>{link}</link>\
                 <pubDate>Mon, 01 Jan 2024 00:00:00 GMT</pubDate></item>"
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"><channel>
  <title>Example News</title>
  <link>https://example.com</link>
  <description>Daily news</description>
  {items}
</channel></rss>"#
    )
}

async fn serve(server: &MockServer, route: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(body)
                .insert_header("Content-Type", "application/xml"),
        )
        .mount(server)
        .await;
}

fn outcome(report: &RunReport, feed_id: i64) -> FeedOutcome {
    report
        .feeds
        .iter()
        .find(|f| f.feed_id == feed_id)
        .map(|f| f.outcome.clone())
        .unwrap()
}

// ============================================================================
// Fan-out Scenarios
// ============================================================================

#[tokio::test]
async fn test_three_entries_two_subscribers() {
    let server = MockServer::start().await;
    serve(
        &server,
        "/rss",
        rss(&[
            ("One", "https://example.com/1"),
            ("Two", "https://example.com/2"),
            ("Three", "https://example.com/3"),
        ]),
    )
    .await;

    let db = test_db().await;
    let url = format!("{}/rss", server.uri());
    let feed_id = db.subscribe(10, &url, None).await.unwrap();
    db.subscribe(20, &url, None).await.unwrap();

    let report = refresher(db.clone())
        .run(&RefreshRequest::all())
        .await
        .unwrap();

    assert_eq!(
        outcome(&report, feed_id),
        FeedOutcome::Ingested {
            entries: 3,
            states: 6
        }
    );
    assert_eq!(db.entries_for_feed(feed_id).await.unwrap().len(), 3);
    assert_eq!(db.count_states_for_feed(feed_id).await.unwrap(), 6);

    let states = db.user_entries(10).await.unwrap();
    assert_eq!(states.len(), 3);
    assert!(states
        .iter()
        .all(|s| s.status == EntryStatus::Unread && !s.starred));
}

#[tokio::test]
async fn test_one_existing_title_yields_two_new_entries() {
    let server = MockServer::start().await;
    let db = test_db().await;
    let url = format!("{}/rss", server.uri());
    let feed_id = db.subscribe(1, &url, None).await.unwrap();

    // Seed one entry through an earlier run
    serve(&server, "/rss", rss(&[("Two", "https://example.com/2")])).await;
    refresher(db.clone())
        .run(&RefreshRequest::all())
        .await
        .unwrap();
    server.reset().await;

    serve(
        &server,
        "/rss",
        rss(&[
            ("One", "https://example.com/1"),
            ("Two", "https://example.com/2"),
            ("Three", "https://example.com/3"),
        ]),
    )
    .await;
    let report = refresher(db.clone())
        .run(&RefreshRequest::all())
        .await
        .unwrap();

    assert_eq!(
        outcome(&report, feed_id),
        FeedOutcome::Ingested {
            entries: 2,
            states: 2
        }
    );
    let mut titles: Vec<String> = db
        .entries_for_feed(feed_id)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.title)
        .collect();
    titles.sort();
    assert_eq!(titles, vec!["One", "Three", "Two"]);
}

#[tokio::test]
async fn test_malformed_document_skips_only_that_feed() {
    let server = MockServer::start().await;
    serve(&server, "/good", rss(&[("Fine", "https://example.com/fine")])).await;
    serve(&server, "/bad", "<rss><channel><title>Broken".to_string()).await;
    serve(&server, "/html", "<html><body>Not a feed</body></html>".to_string()).await;

    let db = test_db().await;
    let good = db
        .subscribe(1, &format!("{}/good", server.uri()), None)
        .await
        .unwrap();
    let bad = db
        .subscribe(1, &format!("{}/bad", server.uri()), None)
        .await
        .unwrap();
    let html = db
        .subscribe(1, &format!("{}/html", server.uri()), None)
        .await
        .unwrap();

    let report = refresher(db.clone())
        .run(&RefreshRequest::all())
        .await
        .unwrap();

    assert_eq!(report.listed, 3);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 2);
    assert!(matches!(outcome(&report, good), FeedOutcome::Ingested { entries: 1, .. }));
    assert!(matches!(outcome(&report, bad), FeedOutcome::Failed(_)));
    assert!(matches!(outcome(&report, html), FeedOutcome::Failed(_)));

    let bad_feed = db.get_feed(bad).await.unwrap().unwrap();
    assert_eq!(bad_feed.last_fetched_at, None);
    assert!(bad_feed.last_error.is_some());
}

#[tokio::test]
async fn test_entry_missing_link_fails_whole_feed() {
    let server = MockServer::start().await;
    let body = r#"<rss version="2.0"><channel><title>Half</title>
        <item><title>Complete</title><link>https://example.com/a</link></item>
        <item><title>No link</title></item>
    </channel></rss>"#;
    serve(&server, "/rss", body.to_string()).await;

    let db = test_db().await;
    let feed_id = db
        .subscribe(1, &format!("{}/rss", server.uri()), None)
        .await
        .unwrap();

    let report = refresher(db.clone())
        .run(&RefreshRequest::all())
        .await
        .unwrap();

    assert!(matches!(outcome(&report, feed_id), FeedOutcome::Failed(_)));
    assert!(db.entries_for_feed(feed_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_http_errors_and_timeouts_are_isolated() {
    let server = MockServer::start().await;
    serve(&server, "/ok", rss(&[("Up", "https://example.com/up")])).await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(rss(&[("Late", "https://example.com/late")]))
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&server)
        .await;

    let db = test_db().await;
    let ok = db
        .subscribe(1, &format!("{}/ok", server.uri()), None)
        .await
        .unwrap();
    let gone = db
        .subscribe(1, &format!("{}/gone", server.uri()), None)
        .await
        .unwrap();
    let slow = db
        .subscribe(1, &format!("{}/slow", server.uri()), None)
        .await
        .unwrap();

    let report = refresher(db.clone())
        .run(&RefreshRequest::all())
        .await
        .unwrap();

    assert!(report.is_complete());
    assert!(matches!(outcome(&report, ok), FeedOutcome::Ingested { .. }));
    match outcome(&report, gone) {
        FeedOutcome::Failed(msg) => assert!(msg.contains("410"), "unexpected message: {msg}"),
        other => panic!("Expected failure, got {:?}", other),
    }
    match outcome(&report, slow) {
        FeedOutcome::Failed(msg) => assert!(msg.contains("timed out"), "unexpected message: {msg}"),
        other => panic!("Expected failure, got {:?}", other),
    }
}

// ============================================================================
// Formats and Normalization
// ============================================================================

#[tokio::test]
async fn test_atom_feed_with_author_shapes() {
    let server = MockServer::start().await;
    let body = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title type="text">Atom Example</title>
  <subtitle>Updates</subtitle>
  <link href="https://atom.example.com/" rel="alternate"/>
  <link href="https://atom.example.com/feed.xml" rel="self"/>
  <icon>https://atom.example.com/favicon.ico</icon>
  <updated>2024-01-02T00:00:00Z</updated>
  <entry>
    <title>Single author</title>
    <id>urn:uuid:1</id>
    <link href="https://atom.example.com/1"/>
    <updated>2024-01-01T00:00:00Z</updated>
    <author><name>Ada</name></author>
    <content type="html">  &lt;p&gt;Body&lt;/p&gt;  </content>
  </entry>
  <entry>
    <title>Two authors</title>
    <id>urn:uuid:2</id>
    <link rel="alternate" href="https://atom.example.com/2"/>
    <updated>2024-01-01T12:00:00Z</updated>
    <author><name>Ada</name></author>
    <author><name>Grace</name></author>
    <summary>Short</summary>
  </entry>
</feed>"#;
    serve(&server, "/atom", body.to_string()).await;

    let db = test_db().await;
    let feed_id = db
        .subscribe(1, &format!("{}/atom", server.uri()), Some("placeholder"))
        .await
        .unwrap();

    refresher(db.clone())
        .run(&RefreshRequest::all())
        .await
        .unwrap();

    let feed = db.get_feed(feed_id).await.unwrap().unwrap();
    assert_eq!(feed.title, "Atom Example");
    assert_eq!(feed.site_url.as_deref(), Some("https://atom.example.com/"));
    assert_eq!(
        feed.icon.as_deref(),
        Some("https://atom.example.com/favicon.ico")
    );

    let mut entries = db.entries_for_feed(feed_id).await.unwrap();
    entries.sort_by(|a, b| a.title.cmp(&b.title));
    assert_eq!(entries[0].title, "Single author");
    assert_eq!(entries[0].author, "Ada");
    assert_eq!(entries[0].content.as_deref(), Some("<p>Body</p>"));
    assert_eq!(entries[0].published_at, 1_704_067_200);
    assert_eq!(entries[1].author, "Ada, Grace");
    assert_eq!(entries[1].link, "https://atom.example.com/2");
}

#[tokio::test]
async fn test_rss_creator_and_media_thumbnail() {
    let server = MockServer::start().await;
    let body = r#"<?xml version="1.0"?>
<rss version="2.0"
     xmlns:dc="http://purl.org/dc/elements/1.1/"
     xmlns:media="http://search.yahoo.com/mrss/"
     xmlns:content="http://purl.org/rss/1.0/modules/content/">
<channel>
  <title>Media Example</title>
  <link>https://media.example.com</link>
  <image><url>https://media.example.com/logo.png</url></image>
  <item>
    <title>Pictured</title>
    <link>https://media.example.com/1</link>
    <author>desk@media.example.com (Jane Doe)</author>
    <dc:creator>Jane Doe (jane@x.com)</dc:creator>
    <content:encoded><![CDATA[<p>Full text</p>]]></content:encoded>
    <media:content url="https://media.example.com/1.jpg" medium="image">
      <media:text>A caption</media:text>
    </media:content>
  </item>
  <item>
    <title>Uncaptioned</title>
    <link>https://media.example.com/2</link>
    <media:thumbnail url="https://media.example.com/2.jpg"/>
  </item>
</channel></rss>"#;
    serve(&server, "/rss", body.to_string()).await;

    let db = test_db().await;
    let feed_id = db
        .subscribe(1, &format!("{}/rss", server.uri()), None)
        .await
        .unwrap();

    refresher(db.clone())
        .run(&RefreshRequest::all())
        .await
        .unwrap();

    let feed = db.get_feed(feed_id).await.unwrap().unwrap();
    assert_eq!(
        feed.icon.as_deref(),
        Some("https://media.example.com/logo.png")
    );

    let mut entries = db.entries_for_feed(feed_id).await.unwrap();
    entries.sort_by(|a, b| a.title.cmp(&b.title));

    let pictured = &entries[0];
    assert_eq!(pictured.author, "jane@x.com");
    assert_eq!(pictured.content.as_deref(), Some("<p>Full text</p>"));
    assert_eq!(
        pictured.thumbnail_url.as_deref(),
        Some("https://media.example.com/1.jpg")
    );
    assert_eq!(pictured.thumbnail_caption.as_deref(), Some("A caption"));

    let uncaptioned = &entries[1];
    assert_eq!(uncaptioned.author, "");
    assert_eq!(
        uncaptioned.thumbnail_caption.as_deref(),
        Some("Uncaptioned")
    );
}

#[tokio::test]
async fn test_json_feed() {
    let server = MockServer::start().await;
    let body = r#"{
        "version": "https://jsonfeed.org/version/1.1",
        "title": "JSON Example",
        "home_page_url": "https://json.example.com/",
        "favicon": "https://json.example.com/favicon.png",
        "items": [
            {"id": "1", "title": "First", "url": "https://json.example.com/1",
             "content_text": "Hello", "authors": ["A", "B"],
             "date_published": "2024-01-01T00:00:00Z"}
        ]
    }"#;
    Mock::given(method("GET"))
        .and(path("/feed.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(body)
                .insert_header("Content-Type", "application/feed+json"),
        )
        .mount(&server)
        .await;

    let db = test_db().await;
    let feed_id = db
        .subscribe(1, &format!("{}/feed.json", server.uri()), None)
        .await
        .unwrap();

    refresher(db.clone())
        .run(&RefreshRequest::all())
        .await
        .unwrap();

    let entries = db.entries_for_feed(feed_id).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].author, "A, B");
    assert_eq!(entries[0].guid.as_deref(), Some("1"));
    assert_eq!(entries[0].published_at, 1_704_067_200);
}

#[tokio::test]
async fn test_latin1_feed_keeps_accented_titles_distinct() {
    let server = MockServer::start().await;
    let body: &[u8] = b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?>\
<rss version=\"2.0\"><channel><title>Caf\xe9</title><link>https://latin.example.com</link>\
<item><title>\xe9t\xe9</title><link>https://latin.example.com/1</link></item>\
<item><title>\xf4t\xe9</title><link>https://latin.example.com/2</link></item>\
</channel></rss>";
    Mock::given(method("GET"))
        .and(path("/latin1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(body)
                .insert_header("Content-Type", "application/rss+xml"),
        )
        .mount(&server)
        .await;

    let db = test_db().await;
    let feed_id = db
        .subscribe(1, &format!("{}/latin1", server.uri()), None)
        .await
        .unwrap();

    let report = refresher(db.clone())
        .run(&RefreshRequest::all())
        .await
        .unwrap();
    assert_eq!(report.new_entries, 2);

    let mut titles: Vec<String> = db
        .entries_for_feed(feed_id)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.title)
        .collect();
    titles.sort();
    assert_eq!(titles, vec!["été".to_string(), "ôté".to_string()]);
    let feed = db.get_feed(feed_id).await.unwrap().unwrap();
    assert_eq!(feed.title, "Café");
}

// ============================================================================
// Run Semantics
// ============================================================================

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let server = MockServer::start().await;
    serve(
        &server,
        "/rss",
        rss(&[("A", "https://example.com/a"), ("B", "https://example.com/b")]),
    )
    .await;

    let db = test_db().await;
    let url = format!("{}/rss", server.uri());
    let feed_id = db.subscribe(1, &url, None).await.unwrap();
    db.subscribe(2, &url, None).await.unwrap();
    let refresher = refresher(db.clone());

    let first = refresher.run(&RefreshRequest::all()).await.unwrap();
    let second = refresher.run(&RefreshRequest::all()).await.unwrap();

    assert_eq!(first.new_states, 4);
    assert_eq!(second.new_entries, 0);
    assert_eq!(second.new_states, 0);
    assert_eq!(db.count_states_for_feed(feed_id).await.unwrap(), 4);
}

#[tokio::test]
async fn test_read_state_survives_refresh() {
    let server = MockServer::start().await;
    serve(&server, "/rss", rss(&[("A", "https://example.com/a")])).await;

    let db = test_db().await;
    let feed_id = db
        .subscribe(1, &format!("{}/rss", server.uri()), None)
        .await
        .unwrap();
    let refresher = refresher(db.clone());
    refresher.run(&RefreshRequest::all()).await.unwrap();

    let entry_id = db.entries_for_feed(feed_id).await.unwrap()[0].id;
    db.set_entry_status(1, entry_id, EntryStatus::Read)
        .await
        .unwrap();
    db.set_entry_starred(1, entry_id, true).await.unwrap();

    refresher
        .run(&RefreshRequest::all().forced())
        .await
        .unwrap();

    let states = db.user_entries(1).await.unwrap();
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].status, EntryStatus::Read);
    assert!(states[0].starred);
}

#[tokio::test]
async fn test_explicit_subset_only_fetches_requested_feeds() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/wanted"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss(&[(
            "W",
            "https://example.com/w",
        )])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/other"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss(&[])))
        .expect(0)
        .mount(&server)
        .await;

    let db = test_db().await;
    let wanted = db
        .subscribe(1, &format!("{}/wanted", server.uri()), None)
        .await
        .unwrap();
    db.subscribe(1, &format!("{}/other", server.uri()), None)
        .await
        .unwrap();

    let report = refresher(db)
        .run(&RefreshRequest::feeds(vec![wanted]))
        .await
        .unwrap();

    assert_eq!(report.listed, 1);
    assert_eq!(report.succeeded, 1);
}

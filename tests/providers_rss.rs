// tests/providers_rss.rs
use live_sources::ingest::providers::rss::parse_feed;

#[test]
fn rss_fixture_parses_into_articles() {
    let xml: &str = include_str!("fixtures/news_rss.xml");
    let recs = parse_feed(xml, 10).expect("parse rss fixture");

    assert_eq!(recs.len(), 3, "untitled item dropped");

    let first = &recs[0].payload;
    assert_eq!(
        recs[0].id.as_deref(),
        Some("https://news.example.com/articles/101")
    );
    assert_eq!(
        first["description"],
        "The new core cuts idle power by 40% according to the vendor."
    );
    assert_eq!(first["published"], "2025-06-09T14:30:00Z");
    assert_eq!(first["type"], "rss_article");
    assert!(first["content"]
        .as_str()
        .unwrap()
        .ends_with("according to the vendor."));

    let second = &recs[1];
    assert_eq!(second.id.as_deref(), Some("news-102"));
    assert_eq!(second.payload["title"], "Open-source database hits 2.0");
    assert_eq!(
        second.payload["description"],
        "Release brings a new query planner & faster replication..."
    );

    // no guid: link is the identity; unparseable date is dropped
    let third = &recs[2];
    assert_eq!(
        third.id.as_deref(),
        Some("https://news.example.com/articles/103")
    );
    assert!(third.payload["published"].is_null());
}

#[test]
fn item_cap_applies_to_fixture() {
    let xml: &str = include_str!("fixtures/news_rss.xml");
    assert_eq!(parse_feed(xml, 2).unwrap().len(), 2);
}

#[test]
fn atom_fixture_parses_via_fallback() {
    let xml: &str = include_str!("fixtures/science_atom.xml");
    let recs = parse_feed(xml, 10).expect("parse atom fixture");
    assert_eq!(recs.len(), 2);

    assert_eq!(
        recs[0].payload["link"],
        "https://science.example.org/posts/galaxy-merger"
    );
    assert_eq!(recs[0].payload["published"], "2025-06-10T08:00:00Z");

    assert_eq!(recs[1].payload["title"], "Ocean heat record");
    assert_eq!(
        recs[1].payload["description"],
        "Sea surface temperatures set a new high."
    );
    assert_eq!(recs[1].payload["published"], "2025-06-09T15:45:00Z");
    assert_eq!(
        recs[1].payload["link"],
        "https://science.example.org/posts/ocean-heat"
    );
}

// src/ingest/mod.rs
pub mod providers;
pub mod scheduler;
pub mod types;

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "ingest_cycles_total",
            "Ingestion cycles by outcome (ok, timeout, network, format, misconfigured)."
        );
        describe_counter!("ingest_entries_total", "Entries appended to rolling windows.");
        describe_counter!(
            "ingest_duplicates_total",
            "Fetched records skipped because their entry id was already in the window."
        );
        describe_counter!(
            "ingest_evicted_total",
            "Entries evicted from the front of a full window."
        );
        describe_counter!(
            "ingest_escalations_total",
            "Sources moved to error after sustained failures."
        );
        describe_histogram!("ingest_fetch_ms", "Fetcher call duration in milliseconds.");
        describe_gauge!("live_sources_workers", "Running per-source worker tasks.");
        describe_gauge!("live_sources_registered", "Registered (non-deleted) sources.");
    });
}

/// Normalize feed text: decode entities, strip tags, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| {
        regex::Regex::new(r"(?is)</?[^>]+>").expect("static tag regex is valid")
    });
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws =
        RE_WS.get_or_init(|| regex::Regex::new(r"\s+").expect("static whitespace regex is valid"));
    out = re_ws.replace_all(&out, " ").to_string();
    out.trim().to_string()
}

/// Cut `s` to `max` chars, appending `...` when something was dropped.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max).collect();
    out.push_str("...");
    out
}

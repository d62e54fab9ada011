//! Recall engine integration tests: merging, ranking, degradation
//!
//! Run with: cargo test --test recall_tests

use std::collections::HashMap;

use chrono::{Duration, Utc};
use chronicle::types::{ChronicleConfig, EmbeddingConfig, SearchOptions};
use chronicle::{Chronicle, MatchOrigin};
use pretty_assertions::assert_eq;

fn remember(chronicle: &Chronicle, content: &str, tags: &[&str], source: &str) -> i64 {
    let tags: Vec<String> = tags.iter().map(|t| t.to_string()).collect();
    chronicle
        .remember(content, &tags, source, &HashMap::new())
        .unwrap()
}

fn lexical_only() -> Chronicle {
    let mut config = ChronicleConfig::in_memory();
    config.embedding = EmbeddingConfig::none();
    Chronicle::open(config).unwrap()
}

#[test]
fn scenario_tools_record_ranks_first() {
    let chronicle = Chronicle::open_in_memory().unwrap();
    remember(&chronicle, "lunch with the team", &[], "calendar");
    let id = remember(
        &chronicle,
        "Built two tools today",
        &["dev"],
        "heartbeat",
    );
    remember(&chronicle, "reviewed a pull request", &["dev"], "heartbeat");
    chronicle.index_pending().unwrap();

    let results = chronicle.search("tools", &SearchOptions::default()).unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0].record.id, id);
}

#[test]
fn degrades_to_pure_lexical_without_model() {
    let with_model = Chronicle::open_in_memory().unwrap();
    let without_model = lexical_only();

    for chronicle in [&with_model, &without_model] {
        remember(chronicle, "rust borrow checker fight", &["dev"], "terminal");
        remember(chronicle, "dinner reservations", &[], "calendar");
        remember(chronicle, "the borrow was repaid", &[], "notes");
    }
    with_model.index_pending().unwrap();

    let degraded = without_model
        .search("borrow", &SearchOptions::default())
        .unwrap();

    // identical to a pure substring match over content, newest first
    assert_eq!(degraded.len(), 2);
    assert_eq!(degraded[0].record.content, "the borrow was repaid");
    assert_eq!(degraded[1].record.content, "rust borrow checker fight");
    assert!(degraded.iter().all(|r| r.origin == MatchOrigin::Lexical));
}

#[test]
fn empty_query_with_since_is_filtered_and_bounded() {
    let chronicle = lexical_only();
    remember(&chronicle, "before the cutoff", &[], "test");

    let cutoff = chronicle.get(1).unwrap().timestamp + Duration::milliseconds(2);
    std::thread::sleep(std::time::Duration::from_millis(5));
    for i in 0..15 {
        remember(&chronicle, &format!("after cutoff {}", i), &[], "test");
    }

    let options = SearchOptions {
        since: Some(cutoff),
        limit: 10,
        ..Default::default()
    };
    let results = chronicle.search("", &options).unwrap();

    assert_eq!(results.len(), 10);
    assert!(results
        .iter()
        .all(|r| r.record.timestamp >= cutoff && r.record.content.starts_with("after")));
    assert!(results
        .windows(2)
        .all(|w| w[0].record.timestamp >= w[1].record.timestamp));
}

#[test]
fn tag_and_time_filters_constrain_query_search() {
    let chronicle = lexical_only();
    remember(&chronicle, "deploy the api", &["work"], "terminal");
    remember(&chronicle, "deploy the blog", &["personal"], "terminal");

    let options = SearchOptions {
        tags: vec!["work".to_string()],
        ..Default::default()
    };
    let results = chronicle.search("deploy", &options).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].record.content, "deploy the api");
}

#[test]
fn source_filter_applies() {
    let chronicle = lexical_only();
    remember(&chronicle, "git push", &[], "shell_history");
    remember(&chronicle, "git push notes", &[], "notes");

    let options = SearchOptions {
        source: Some("shell_history".to_string()),
        ..Default::default()
    };
    let results = chronicle.search("git", &options).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].record.source, "shell_history");
}

#[test]
fn semantic_candidates_surface_without_keyword_overlap() {
    let chronicle = Chronicle::open_in_memory().unwrap();
    remember(
        &chronicle,
        "deployed the payment service to production today",
        &[],
        "terminal",
    );
    remember(&chronicle, "watered the garden", &[], "home");
    chronicle.index_pending().unwrap();

    // shares vocabulary with the first record but not the word "shipped"
    let results = chronicle
        .search(
            "deployed payment service production",
            &SearchOptions::default(),
        )
        .unwrap();

    assert!(!results.is_empty());
    assert!(results[0]
        .record
        .content
        .contains("payment service"));
}

#[test]
fn future_time_window_matches_nothing() {
    let chronicle = lexical_only();
    remember(&chronicle, "present day entry", &[], "test");

    let options = SearchOptions {
        since: Some(Utc::now() + Duration::days(1)),
        until: Some(Utc::now() + Duration::days(2)),
        ..Default::default()
    };
    let results = chronicle.search("", &options).unwrap();
    assert!(results.is_empty());
}

#[test]
fn search_never_errors_on_no_matches() {
    let chronicle = Chronicle::open_in_memory().unwrap();
    let results = chronicle
        .search("anything at all", &SearchOptions::default())
        .unwrap();
    assert!(results.is_empty());
}

//! Integration tests for the metrics path: session logs on disk →
//! forward decode → reductions → windowed summary and timeseries.
//!
//! Logs are generated relative to the current time so they fall inside the
//! trailing windows.

use agentpulse_core::config::{MetricsConfig, ProvidersConfig};
use agentpulse_core::metrics::{build_segments, MetricsAggregator};
use agentpulse_core::provider::formats_from_config;
use agentpulse_core::{ClassifiedEvent, TurnKind, WindowKey};
use chrono::{DateTime, Duration, Utc};
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::TempDir;

enum Turn<'a> {
    User(i64, &'a str),
    Assistant(i64),
}

/// Write a Claude Code log whose turns are `minutes` offsets from `now`.
fn write_claude_log(path: &Path, now: DateTime<Utc>, turns: &[Turn<'_>]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut f = fs::File::create(path).unwrap();
    for turn in turns {
        let line = match turn {
            Turn::User(secs, text) => serde_json::json!({
                "type": "user",
                "timestamp": (now + Duration::seconds(*secs)).to_rfc3339(),
                "message": {"role": "user", "content": text}
            }),
            Turn::Assistant(secs) => serde_json::json!({
                "type": "assistant",
                "timestamp": (now + Duration::seconds(*secs)).to_rfc3339(),
                "message": {"role": "assistant", "content": [{"type": "text", "text": "done"}]}
            }),
        };
        writeln!(f, "{}", line).unwrap();
    }
}

fn aggregator(home: &Path) -> MetricsAggregator {
    let formats = formats_from_config(&ProvidersConfig {
        claude_code_path: Some(home.join(".claude")),
        codex_path: Some(home.join(".codex")),
        path_refresh_secs: 10,
    });
    MetricsAggregator::new(formats, MetricsConfig::default())
}

fn close(a: f64, b: f64, tolerance: f64) -> bool {
    (a - b).abs() <= tolerance
}

#[test]
fn test_summary_over_two_sessions() {
    let temp = TempDir::new().unwrap();
    let now = Utc::now();
    let projects = temp.path().join(".claude/projects");

    write_claude_log(
        &projects.join("-work-tracker/a.jsonl"),
        now,
        &[
            Turn::User(-3000, "refactor the session tracker module"),
            Turn::Assistant(-2400),
            Turn::User(-2100, "the session tracker refactor broke tests"),
            Turn::Assistant(-1800),
        ],
    );
    write_claude_log(
        &projects.join("-work-docs/b.jsonl"),
        now,
        &[Turn::User(-1200, "write release notes")],
    );

    let summary = aggregator(temp.path()).summary();

    assert_eq!(summary.current.session_count, 2);
    assert_eq!(summary.current.running, 1);
    assert_eq!(summary.current.idle, 1);

    let hour = &summary.windows[&WindowKey::Hour];
    assert_eq!(hour.session_count, 2);
    assert_eq!(hour.task_count, 2);
    assert_eq!(hour.assignment_count, 3);
    assert_eq!(hour.response_count, 1);
    assert_eq!(hour.rework_count, 1);
    assert_eq!(hour.rework_rate, Some(0.5));
    assert_eq!(hour.median_response_seconds, Some(300.0));
    assert_eq!(hour.median_runtime_seconds, Some(450.0));

    // 2100 s running out of 4200 s observed, give or take the clock moving
    assert!(close(hour.running_seconds, 2100.0, 2.0), "{}", hour.running_seconds);
    assert!(close(hour.total_seconds, 4200.0, 4.0), "{}", hour.total_seconds);
    assert!(close(hour.active_utilization, 0.5, 0.01));

    let histogram_total: usize = hour.response_histogram.iter().map(|b| b.count).sum();
    assert_eq!(histogram_total, 1);
    // 5 minutes lands in the [5, 10) bucket
    let bucket = hour
        .response_histogram
        .iter()
        .find(|b| b.count == 1)
        .unwrap();
    assert_eq!(bucket.minutes, 5);
}

fn rework_count_for_gap(gap_secs: i64) -> usize {
    let temp = TempDir::new().unwrap();
    let now = Utc::now();
    write_claude_log(
        &temp.path().join(".claude/projects/-work/s.jsonl"),
        now,
        &[
            Turn::User(-2000, "fix the login redirect loop"),
            Turn::Assistant(-1800),
            Turn::User(-1800 + gap_secs, "login redirect loop still happens"),
            Turn::Assistant(-10),
        ],
    );
    aggregator(temp.path()).summary().windows[&WindowKey::Hour].rework_count
}

#[test]
fn test_rework_depends_on_gap() {
    assert_eq!(rework_count_for_gap(300), 1);
    assert_eq!(rework_count_for_gap(700), 0);
}

#[test]
fn test_utilization_and_timeseries_bounds() {
    let temp = TempDir::new().unwrap();
    let now = Utc::now();
    let projects = temp.path().join(".claude/projects");

    for i in 0..6i64 {
        let base = -(i * 900) - 300;
        let mut turns = vec![Turn::User(base, "run the benchmarks"), Turn::Assistant(base + 120 * (i + 1))];
        if i % 2 == 0 {
            turns.push(Turn::User(base + 200 * (i + 1), "now profile the hot path"));
        }
        write_claude_log(&projects.join(format!("-p{}/s{}.jsonl", i, i)), now, &turns);
    }

    let aggregator = aggregator(temp.path());
    let summary = aggregator.summary();

    for window in summary.windows.values() {
        assert!((0.0..=1.0).contains(&window.active_utilization));
        assert!((0.0..=1.0).contains(&window.idle_over_threshold));
        assert!(window.running_seconds <= window.total_seconds);
    }

    for key in WindowKey::ALL {
        let series = aggregator.timeseries(key, None);
        assert!(!series.points.is_empty());
        for point in &series.points {
            assert!(point.running <= point.total);
            assert!((0.0..=1.0).contains(&point.utilization));
        }
    }

    let hourly = aggregator.timeseries(WindowKey::Hour, Some(300));
    assert_eq!(hourly.step_seconds, 300);
    assert_eq!(hourly.points.len(), 12);
    assert!(hourly.points.iter().any(|p| p.running > 0));
}

#[test]
fn test_segments_tile_the_window() {
    let end = Utc::now();
    let start = end - Duration::hours(1);
    let kinds = [
        TurnKind::User,
        TurnKind::User,
        TurnKind::Assistant,
        TurnKind::User,
        TurnKind::Assistant,
        TurnKind::Assistant,
    ];
    let events: Vec<ClassifiedEvent> = kinds
        .iter()
        .enumerate()
        .map(|(i, &kind)| ClassifiedEvent {
            timestamp: start - Duration::minutes(30) + Duration::minutes(i as i64 * 15),
            kind,
            text: None,
        })
        .collect();

    let segments = build_segments(&events, start, end);

    // State carries in, so the first segment starts at the window start
    assert_eq!(segments.first().unwrap().start, start);
    assert_eq!(segments.last().unwrap().end, end);
    for pair in segments.windows(2) {
        assert_eq!(pair[0].end, pair[1].start);
        assert_ne!(pair[0].state, pair[1].state);
    }
    let covered: f64 = segments.iter().map(|s| s.seconds()).sum();
    assert!(close(covered, 3600.0, 0.001));
}

//! Per-window computation: clipped segments, fixed-step timeseries, and the
//! aggregated [`MetricsWindow`].

use crate::metrics::reduce::SessionStats;
use crate::metrics::session::MetricsSession;
use crate::metrics::stats::{self, HistogramBucket};
use crate::types::{ClassifiedEvent, TurnKind, WindowKey};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// A maximal span of unchanged turn state, clipped to a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub state: TurnKind,
}

impl Segment {
    pub fn seconds(&self) -> f64 {
        (self.end - self.start).num_milliseconds().max(0) as f64 / 1000.0
    }
}

/// Collapse ascending events into segments tiling the session's part of
/// `[window_start, window_end]`.
///
/// State before `window_start` carries in from the last earlier event. The
/// tiled span begins at `window_start` when state carries in, otherwise at
/// the first in-window event. A session with no in-window events that was
/// already idle is not part of the window at all.
pub fn build_segments(
    events: &[ClassifiedEvent],
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Vec<Segment> {
    if window_end <= window_start {
        return Vec::new();
    }

    let first_inside = events.partition_point(|e| e.timestamp < window_start);
    let carried = first_inside
        .checked_sub(1)
        .and_then(|i| events.get(i))
        .map(|e| e.kind);
    let inside: Vec<&ClassifiedEvent> = events[first_inside..]
        .iter()
        .take_while(|e| e.timestamp <= window_end)
        .collect();

    let (mut cursor, mut state) = match (carried, inside.first()) {
        (Some(TurnKind::Assistant), None) | (None, None) => return Vec::new(),
        (Some(kind), _) => (window_start, kind),
        (None, Some(first)) => (first.timestamp, first.kind),
    };

    let mut segments = Vec::new();
    for event in inside {
        if event.kind == state {
            continue;
        }
        if event.timestamp > cursor {
            segments.push(Segment {
                start: cursor,
                end: event.timestamp,
                state,
            });
        }
        cursor = event.timestamp;
        state = event.kind;
    }
    if window_end > cursor {
        segments.push(Segment {
            start: cursor,
            end: window_end,
            state,
        });
    }

    segments
}

/// One step of a utilization timeseries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeseriesPoint {
    /// Step start
    pub t: DateTime<Utc>,
    /// Sessions running at any moment of the step
    pub running: usize,
    /// Sessions present at any moment of the step
    pub total: usize,
    pub utilization: f64,
}

/// Fixed-step running/total counts for one window.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Timeseries {
    pub window: WindowKey,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub step_seconds: u64,
    pub points: Vec<TimeseriesPoint>,
}

/// Count running/present sessions per step.
///
/// Each session contributes at most one to `total` (and `running`) per
/// step, so `running <= total` always holds.
pub fn build_timeseries(
    window: WindowKey,
    per_session: &[Vec<Segment>],
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    step_seconds: u64,
) -> Timeseries {
    let step_ms = (step_seconds.max(1) * 1000) as i64;
    let span_ms = (window_end - window_start).num_milliseconds().max(0);
    let steps = ((span_ms + step_ms - 1) / step_ms) as usize;

    let mut running = vec![0usize; steps];
    let mut total = vec![0usize; steps];
    let mut present = vec![false; steps];
    let mut busy = vec![false; steps];

    let step_of = |t: DateTime<Utc>| (t - window_start).num_milliseconds().max(0) / step_ms;

    for segments in per_session {
        present.iter_mut().for_each(|p| *p = false);
        busy.iter_mut().for_each(|b| *b = false);

        for segment in segments {
            let first = step_of(segment.start) as usize;
            // Half-open: a segment ending exactly on a step boundary does not
            // touch the next step
            let end_ms = (segment.end - window_start).num_milliseconds().max(0);
            let last = (((end_ms + step_ms - 1) / step_ms) as usize).min(steps);
            for i in first..last.max(first + 1).min(steps) {
                present[i] = true;
                if segment.state.is_running() {
                    busy[i] = true;
                }
            }
        }

        for i in 0..steps {
            total[i] += present[i] as usize;
            running[i] += busy[i] as usize;
        }
    }

    let points = (0..steps)
        .map(|i| TimeseriesPoint {
            t: window_start + Duration::milliseconds(i as i64 * step_ms),
            running: running[i],
            total: total[i],
            utilization: if total[i] == 0 {
                0.0
            } else {
                running[i] as f64 / total[i] as f64
            },
        })
        .collect();

    Timeseries {
        window,
        window_start,
        window_end,
        step_seconds: step_seconds.max(1),
        points,
    }
}

/// Fraction of occupied steps whose idle share meets `threshold_percent`.
pub fn idle_over_threshold(points: &[TimeseriesPoint], threshold_percent: f64) -> f64 {
    let threshold = threshold_percent / 100.0;
    let occupied: Vec<&TimeseriesPoint> = points.iter().filter(|p| p.total > 0).collect();
    if occupied.is_empty() {
        return 0.0;
    }
    let idle = occupied
        .iter()
        .filter(|p| 1.0 - p.utilization >= threshold - 1e-9)
        .count();
    idle as f64 / occupied.len() as f64
}

/// Aggregated statistics for one trailing window.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsWindow {
    pub window: WindowKey,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub session_count: usize,
    pub running_seconds: f64,
    pub total_seconds: f64,
    pub active_utilization: f64,
    pub idle_over_threshold: f64,
    pub task_count: usize,
    pub assignment_count: usize,
    pub response_count: usize,
    pub rework_count: usize,
    pub throughput_per_hour: f64,
    pub task_supply_rate: f64,
    pub median_runtime_seconds: Option<f64>,
    pub p90_runtime_seconds: Option<f64>,
    pub median_response_seconds: Option<f64>,
    pub p90_response_seconds: Option<f64>,
    pub bottleneck_index: Option<f64>,
    pub fragmentation: Option<f64>,
    pub rework_rate: Option<f64>,
    pub long_tail_runtime_seconds: Option<f64>,
    pub response_histogram: Vec<HistogramBucket>,
}

/// Inputs shared by every window of one summary.
pub struct WindowInputs<'a> {
    pub sessions: &'a [MetricsSession],
    pub stats: &'a SessionStats,
    pub now: DateTime<Utc>,
    pub step_seconds: u64,
    pub idle_threshold_percent: f64,
}

/// Segments per session for one window, dropping sessions outside it.
pub fn window_segments(
    sessions: &[MetricsSession],
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Vec<Vec<Segment>> {
    sessions
        .iter()
        .map(|s| build_segments(&s.events, window_start, window_end))
        .filter(|segments| !segments.is_empty())
        .collect()
}

pub fn compute_window(window: WindowKey, inputs: &WindowInputs<'_>) -> MetricsWindow {
    let window_end = inputs.now;
    let window_start = window_end - window.duration();
    let in_window = |t: DateTime<Utc>| t >= window_start && t <= window_end;

    let per_session = window_segments(inputs.sessions, window_start, window_end);
    let (running_seconds, total_seconds) = per_session
        .iter()
        .flatten()
        .fold((0.0, 0.0), |(running, total), seg| {
            let secs = seg.seconds();
            if seg.state.is_running() {
                (running + secs, total + secs)
            } else {
                (running, total + secs)
            }
        });
    let active_utilization = if total_seconds > 0.0 {
        (running_seconds / total_seconds).clamp(0.0, 1.0)
    } else {
        0.0
    };

    let timeseries = build_timeseries(
        window,
        &per_session,
        window_start,
        window_end,
        inputs.step_seconds,
    );

    let tasks: Vec<_> = inputs.stats.tasks.iter().filter(|t| in_window(t.end)).collect();
    let assignment_count = inputs
        .stats
        .assignments
        .iter()
        .filter(|a| in_window(a.at))
        .count();
    let response_secs: Vec<f64> = inputs
        .stats
        .responses
        .iter()
        .filter(|r| in_window(r.at))
        .map(|r| r.response_secs)
        .collect();
    let rework_count = inputs
        .stats
        .reworks
        .iter()
        .filter(|r| in_window(r.at))
        .count();

    let runtimes: Vec<f64> = tasks.iter().map(|t| t.runtime_secs).collect();
    let prompts: Vec<f64> = tasks.iter().map(|t| t.prompts as f64).collect();
    let reworked = tasks.iter().filter(|t| t.reworked).count();
    let hours = window.hours();

    let median_runtime = stats::median(&runtimes);
    let median_response = stats::median(&response_secs);

    MetricsWindow {
        window,
        window_start,
        window_end,
        session_count: per_session.len(),
        running_seconds,
        total_seconds,
        active_utilization,
        idle_over_threshold: idle_over_threshold(
            &timeseries.points,
            inputs.idle_threshold_percent,
        ),
        task_count: tasks.len(),
        assignment_count,
        response_count: response_secs.len(),
        rework_count,
        throughput_per_hour: tasks.len() as f64 / hours,
        task_supply_rate: assignment_count as f64 / hours,
        median_runtime_seconds: median_runtime,
        p90_runtime_seconds: stats::percentile(&runtimes, 0.9),
        median_response_seconds: median_response,
        p90_response_seconds: stats::percentile(&response_secs, 0.9),
        bottleneck_index: stats::ratio(median_response, median_runtime),
        fragmentation: stats::mean(&prompts),
        rework_rate: if tasks.is_empty() {
            None
        } else {
            Some(reworked as f64 / tasks.len() as f64)
        },
        long_tail_runtime_seconds: stats::percentile(&runtimes, 0.95),
        response_histogram: stats::histogram(&response_secs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(mins: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 25, 12, 0, 0).unwrap() + Duration::minutes(mins)
    }

    fn ev(mins: i64, kind: TurnKind) -> ClassifiedEvent {
        ClassifiedEvent {
            timestamp: t(mins),
            kind,
            text: None,
        }
    }

    fn assert_tiles(segments: &[Segment], start: DateTime<Utc>, end: DateTime<Utc>) {
        assert_eq!(segments.first().unwrap().start, start);
        assert_eq!(segments.last().unwrap().end, end);
        for pair in segments.windows(2) {
            assert_eq!(pair[0].end, pair[1].start, "gap or overlap in {:?}", segments);
            assert_ne!(pair[0].state, pair[1].state);
        }
        for seg in segments {
            assert!(seg.start < seg.end);
        }
    }

    #[test]
    fn test_segments_carry_state_into_window() {
        let events = vec![
            ev(-30, TurnKind::User),
            ev(10, TurnKind::Assistant),
            ev(20, TurnKind::Assistant),
            ev(40, TurnKind::User),
        ];
        let segments = build_segments(&events, t(0), t(60));
        assert_tiles(&segments, t(0), t(60));
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].state, TurnKind::User);
        assert_eq!(segments[0].end, t(10));
        assert_eq!(segments[2].state, TurnKind::User);
    }

    #[test]
    fn test_segments_start_at_first_event() {
        let events = vec![ev(15, TurnKind::User), ev(25, TurnKind::Assistant)];
        let segments = build_segments(&events, t(0), t(60));
        assert_tiles(&segments, t(15), t(60));
        assert_eq!(segments[0].seconds(), 600.0);
    }

    #[test]
    fn test_segments_idempotent() {
        let events = vec![
            ev(-5, TurnKind::Assistant),
            ev(3, TurnKind::User),
            ev(7, TurnKind::Assistant),
        ];
        let a = build_segments(&events, t(0), t(60));
        let b = build_segments(&events, t(0), t(60));
        assert_eq!(a, b);
        assert_tiles(&a, t(0), t(60));
    }

    #[test]
    fn test_idle_session_outside_window_excluded() {
        let events = vec![ev(-300, TurnKind::User), ev(-200, TurnKind::Assistant)];
        assert!(build_segments(&events, t(0), t(60)).is_empty());
        assert!(build_segments(&[], t(0), t(60)).is_empty());
    }

    #[test]
    fn test_timeseries_counts() {
        let a = vec![Segment {
            start: t(0),
            end: t(2),
            state: TurnKind::User,
        }];
        let b = vec![
            Segment {
                start: t(0),
                end: t(1),
                state: TurnKind::Assistant,
            },
            Segment {
                start: t(1),
                end: t(3),
                state: TurnKind::User,
            },
        ];
        let ts = build_timeseries(WindowKey::Hour, &[a, b], t(0), t(3), 60);
        assert_eq!(ts.points.len(), 3);
        assert_eq!((ts.points[0].running, ts.points[0].total), (1, 2));
        assert_eq!((ts.points[1].running, ts.points[1].total), (2, 2));
        assert_eq!((ts.points[2].running, ts.points[2].total), (1, 1));
        for p in &ts.points {
            assert!(p.running <= p.total);
            assert!((0.0..=1.0).contains(&p.utilization));
        }
    }

    #[test]
    fn test_idle_over_threshold() {
        let point = |running, total| TimeseriesPoint {
            t: t(0),
            running,
            total,
            utilization: if total == 0 { 0.0 } else { running as f64 / total as f64 },
        };
        let points = [point(0, 0), point(0, 2), point(1, 5), point(2, 2)];
        // idle ratios: 1.0, 0.8, 0.0 → two of three occupied steps meet 80%
        assert!((idle_over_threshold(&points, 80.0) - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(idle_over_threshold(&[point(0, 0)], 80.0), 0.0);
    }

    #[test]
    fn test_compute_window_empty() {
        let stats = SessionStats::default();
        let inputs = WindowInputs {
            sessions: &[],
            stats: &stats,
            now: t(0),
            step_seconds: 60,
            idle_threshold_percent: 80.0,
        };
        let window = compute_window(WindowKey::Hour, &inputs);
        assert_eq!(window.active_utilization, 0.0);
        assert_eq!(window.total_seconds, 0.0);
        assert_eq!(window.task_count, 0);
        assert!(window.median_runtime_seconds.is_none());
        assert!(window.bottleneck_index.is_none());
        assert!(window.fragmentation.is_none());
        assert!(window.rework_rate.is_none());
        assert_eq!(window.response_histogram.len(), 10);
    }
}

//! Cross-session rollups, recomputed from a discovered session set on every call.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};

use crate::pricing::PricingTable;
use crate::types::{
    DailyMetric, DayCount, ModelUsage, PeakHour, ProjectAggregate, Session, SessionStats,
    TokenCounts, TokenUsage,
};

/// Sessions with activity inside this window count as active.
pub const DEFAULT_ACTIVE_WINDOW_SECS: i64 = 5 * 60;
/// Number of peak hours reported.
pub const DEFAULT_PEAK_HOURS: usize = 3;

/// Longest window `daily_metrics` will bucket; larger requests are clamped.
pub const MAX_DAILY_DAYS: u32 = 3660;

const SEARCH_RECENT_RECORDS: usize = 10;

pub fn is_active(session: &Session, now: DateTime<Utc>, window: Duration) -> bool {
    session
        .last_activity
        .is_some_and(|t| now.signed_duration_since(t) < window)
}

pub fn active_session_count(sessions: &[Session], now: DateTime<Utc>, window: Duration) -> usize {
    sessions
        .iter()
        .filter(|s| is_active(s, now, window))
        .count()
}

/// Group sessions by project name, most recently active project first.
pub fn project_rollups(
    sessions: &[Session],
    now: DateTime<Utc>,
    active_window: Duration,
) -> Vec<ProjectAggregate> {
    let mut projects: BTreeMap<&str, ProjectAggregate> = BTreeMap::new();

    for session in sessions {
        let project = projects
            .entry(session.project_name.as_str())
            .or_insert_with(|| ProjectAggregate {
                project_name: session.project_name.clone(),
                project_path: session.project_path.clone(),
                session_count: 0,
                active_sessions: 0,
                model_usage: BTreeMap::new(),
                tokens: TokenUsage::default(),
                first_activity: None,
                last_activity: None,
            });

        project.session_count += 1;
        if is_active(session, now, active_window) {
            project.active_sessions += 1;
        }
        *project.model_usage.entry(session.model.clone()).or_insert(0) += 1;
        project.tokens.merge(&session.tokens_used);
        project.first_activity = min_opt(project.first_activity, session.start_time);
        project.last_activity = max_opt(project.last_activity, session.last_activity);
    }

    let mut rollups: Vec<ProjectAggregate> = projects.into_values().collect();
    rollups.sort_by(|a, b| {
        b.last_activity
            .cmp(&a.last_activity)
            .then_with(|| a.project_name.cmp(&b.project_name))
    });
    rollups
}

#[derive(Default)]
struct DayBucket<'a> {
    counted: HashSet<&'a str>,
    message_count: usize,
    counts_by_model: HashMap<&'a str, TokenCounts>,
    model_usage: BTreeMap<String, usize>,
}

/// Metrics for each of the last `days` calendar days (UTC), oldest first.
/// `days` is clamped to [`MAX_DAILY_DAYS`].
///
/// A session id contributes to a day's session count once, even when the same
/// id shows up in transcripts under several project directories.
pub fn daily_metrics(
    sessions: &[Session],
    days: u32,
    now: DateTime<Utc>,
    pricing: &PricingTable,
) -> Vec<DailyMetric> {
    if days == 0 {
        return Vec::new();
    }

    let days = days.min(MAX_DAILY_DAYS);
    let today = now.date_naive();
    let first_day = today
        .checked_sub_signed(Duration::days(i64::from(days) - 1))
        .unwrap_or(NaiveDate::MIN);

    let mut buckets: BTreeMap<NaiveDate, DayBucket> = BTreeMap::new();
    let mut day = first_day;
    while day <= today {
        buckets.insert(day, DayBucket::default());
        day += Duration::days(1);
    }

    for session in sessions {
        for record in &session.records {
            let Some(bucket) = buckets.get_mut(&record.timestamp.date_naive()) else {
                continue;
            };

            bucket.message_count += 1;
            *bucket
                .counts_by_model
                .entry(session.model.as_str())
                .or_default() += record.usage;

            if bucket.counted.insert(session.id.as_str()) {
                *bucket.model_usage.entry(session.model.clone()).or_insert(0) += 1;
            }
        }
    }

    buckets
        .into_iter()
        .map(|(date, bucket)| {
            let mut tokens = TokenUsage::default();
            for (model, counts) in &bucket.counts_by_model {
                tokens.merge(&TokenUsage::priced(*counts, &pricing.lookup(model)));
            }
            DailyMetric {
                date,
                session_count: bucket.counted.len(),
                message_count: bucket.message_count,
                tokens,
                model_usage: bucket.model_usage,
            }
        })
        .collect()
}

/// Hours of the day (UTC) averaging more than one active session per day.
///
/// For each hour, distinct sessions per (day, hour) are summed and divided by
/// the number of days with any activity. Busiest hours come first.
pub fn peak_hours(sessions: &[Session], top_n: usize) -> Vec<PeakHour> {
    let mut slots: HashMap<(NaiveDate, u32), HashSet<&str>> = HashMap::new();
    let mut observed_days: HashSet<NaiveDate> = HashSet::new();

    for session in sessions {
        for record in &session.records {
            let date = record.timestamp.date_naive();
            observed_days.insert(date);
            slots
                .entry((date, record.timestamp.hour()))
                .or_default()
                .insert(session.id.as_str());
        }
    }

    if observed_days.is_empty() {
        return Vec::new();
    }

    let mut totals = [0usize; 24];
    for ((_, hour), ids) in &slots {
        totals[*hour as usize] += ids.len();
    }

    let day_count = observed_days.len() as f64;
    let mut peaks: Vec<PeakHour> = totals
        .iter()
        .enumerate()
        .map(|(hour, total)| PeakHour {
            hour: hour as u32,
            avg_sessions: *total as f64 / day_count,
        })
        .filter(|p| p.avg_sessions > 1.0)
        .collect();

    peaks.sort_by(|a, b| {
        b.avg_sessions
            .total_cmp(&a.avg_sessions)
            .then_with(|| a.hour.cmp(&b.hour))
    });
    peaks.truncate(top_n);
    peaks
}

/// Sessions per inferred model, most used first.
pub fn model_usage(sessions: &[Session]) -> Vec<ModelUsage> {
    let mut by_model: BTreeMap<&str, ModelUsage> = BTreeMap::new();

    for session in sessions {
        let entry = by_model
            .entry(session.model.as_str())
            .or_insert_with(|| ModelUsage {
                model: session.model.clone(),
                sessions: 0,
                tokens: TokenUsage::default(),
            });
        entry.sessions += 1;
        entry.tokens.merge(&session.tokens_used);
    }

    let mut usage: Vec<ModelUsage> = by_model.into_values().collect();
    usage.sort_by(|a, b| b.sessions.cmp(&a.sessions).then_with(|| a.model.cmp(&b.model)));
    usage
}

/// Case-insensitive substring match on project name, recent content and
/// modified file paths. An empty query matches every session.
pub fn matches_query(session: &Session, query: &str) -> bool {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return true;
    }

    if session.project_name.to_lowercase().contains(&needle) {
        return true;
    }

    let recent_start = session
        .records
        .len()
        .saturating_sub(SEARCH_RECENT_RECORDS);
    if session.records[recent_start..]
        .iter()
        .any(|r| r.content.to_lowercase().contains(&needle))
    {
        return true;
    }

    session
        .files_modified
        .iter()
        .any(|f| f.to_lowercase().contains(&needle))
}

pub fn search<'a>(sessions: &'a [Session], query: &str) -> Vec<&'a Session> {
    sessions
        .iter()
        .filter(|s| matches_query(s, query))
        .collect()
}

/// Overview across every session.
pub fn session_stats(sessions: &[Session], now: DateTime<Utc>, active_window: Duration) -> SessionStats {
    let mut by_status: BTreeMap<String, usize> = BTreeMap::new();
    let mut tokens = TokenUsage::default();
    let mut day_counts: BTreeMap<String, usize> = BTreeMap::new();

    for session in sessions {
        *by_status.entry(session.status.to_string()).or_insert(0) += 1;
        tokens.merge(&session.tokens_used);
        if let Some(start) = session.start_time {
            *day_counts
                .entry(start.format("%Y-%m-%d").to_string())
                .or_insert(0) += 1;
        }
    }

    SessionStats {
        total_sessions: sessions.len(),
        active_sessions: active_session_count(sessions, now, active_window),
        by_status,
        tokens,
        sessions_over_time: day_counts
            .into_iter()
            .map(|(date, count)| DayCount { date, count })
            .collect(),
    }
}

fn min_opt(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn max_opt(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

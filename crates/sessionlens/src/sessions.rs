use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use clap::Subcommand;
use colored::Colorize;

use sessionlens_sessions::{
    DailyMetric, ModelUsage, PeakHour, ProjectAggregate, Session, SessionFilter, SessionStats,
    SessionStatus, SessionStore,
};

const DEFAULT_DAYS: u32 = 7;
const RECENT_MESSAGES: usize = 5;

#[derive(Subcommand, Debug)]
pub enum SessionsAction {
    /// List all sessions
    List {
        /// Filter by project name
        #[arg(long)]
        project: Option<String>,

        /// Filter by status (working, idle, complete, error)
        #[arg(long)]
        status: Option<SessionStatus>,

        /// Show sessions active on or after this date (YYYY-MM-DD)
        #[arg(long)]
        after: Option<String>,

        /// Show sessions started on or before this date (YYYY-MM-DD)
        #[arg(long)]
        before: Option<String>,

        /// Search project names, recent messages and modified files
        #[arg(long)]
        search: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show detailed session info
    Show {
        /// Session ID (launches interactive picker if omitted)
        id: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Per-project rollups
    Projects {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Per-day activity for the last N days
    Daily {
        /// Number of days, including today
        #[arg(long, default_value_t = DEFAULT_DAYS)]
        days: u32,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Sessions per model
    Models {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Busiest hours of the day (UTC)
    PeakHours {
        /// How many hours to report (default from config)
        #[arg(long)]
        top: Option<usize>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Search sessions
    Search {
        query: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show aggregate statistics
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

pub fn handle_sessions_command(store: &SessionStore, action: SessionsAction) -> Result<()> {
    match action {
        SessionsAction::List {
            project,
            status,
            after,
            before,
            search,
            json,
        } => {
            let filter = build_filter(project, status, after, before, search)?;
            let sessions = store.list(&filter).context("Failed to list sessions")?;

            if json {
                println!("{}", serde_json::to_string_pretty(&sessions)?);
            } else if sessions.is_empty() {
                println!("{}", "No sessions found.".dimmed());
            } else {
                print_sessions_table(&sessions);
            }
        }
        SessionsAction::Show { id, json } => {
            let session = resolve_session(store, id)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&session)?);
            } else {
                print_session_detail(&session);
            }
        }
        SessionsAction::Projects { json } => {
            let projects = store.project_rollups()?;

            if json {
                println!("{}", serde_json::to_string_pretty(&projects)?);
            } else if projects.is_empty() {
                println!("{}", "No projects found.".dimmed());
            } else {
                print_projects_table(&projects);
            }
        }
        SessionsAction::Daily { days, json } => {
            let metrics = store.daily_metrics(days)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&metrics)?);
            } else {
                print_daily_table(&metrics);
            }
        }
        SessionsAction::Models { json } => {
            let usage = store.model_usage()?;

            if json {
                println!("{}", serde_json::to_string_pretty(&usage)?);
            } else if usage.is_empty() {
                println!("{}", "No sessions found.".dimmed());
            } else {
                print_models_table(&usage);
            }
        }
        SessionsAction::PeakHours { top, json } => {
            let peaks = match top {
                Some(n) => store.clone().with_peak_hours(n).peak_hours()?,
                None => store.peak_hours()?,
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&peaks)?);
            } else if peaks.is_empty() {
                println!(
                    "{}",
                    "No hour averages more than one session per day.".dimmed()
                );
            } else {
                print_peak_hours(&peaks);
            }
        }
        SessionsAction::Search { query, json } => {
            let sessions = store.search(&query)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&sessions)?);
            } else if sessions.is_empty() {
                println!("{}", format!("No sessions match \"{}\".", query).dimmed());
            } else {
                print_sessions_table(&sessions);
            }
        }
        SessionsAction::Stats { json } => {
            let stats = store.stats()?;

            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_stats(&stats);
            }
        }
    }

    Ok(())
}

fn build_filter(
    project: Option<String>,
    status: Option<SessionStatus>,
    after: Option<String>,
    before: Option<String>,
    search: Option<String>,
) -> Result<SessionFilter> {
    let after = after
        .map(|s| parse_date_bound(&s, false).context("Invalid --after date"))
        .transpose()?;
    let before = before
        .map(|s| parse_date_bound(&s, true).context("Invalid --before date"))
        .transpose()?;

    Ok(SessionFilter {
        project,
        status,
        after,
        before,
        search,
    })
}

/// Start (or, with `end_of_day`, the last second) of a `YYYY-MM-DD` day in UTC.
fn parse_date_bound(s: &str, end_of_day: bool) -> Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")?;
    let (h, m, sec) = if end_of_day { (23, 59, 59) } else { (0, 0, 0) };
    let naive = date
        .and_hms_opt(h, m, sec)
        .with_context(|| format!("Invalid time for {}", s))?;
    Ok(Utc.from_utc_datetime(&naive))
}

fn resolve_session(store: &SessionStore, id: Option<String>) -> Result<Session> {
    if let Some(id) = id {
        return store
            .get(&id)?
            .with_context(|| format!("Session not found: {}", id));
    }

    // Interactive picker
    let sessions = store.discover()?;
    if sessions.is_empty() {
        anyhow::bail!("No sessions found.");
    }

    let items: Vec<String> = sessions.iter().map(picker_label).collect();

    let selection = dialoguer::FuzzySelect::new()
        .with_prompt("Select a session")
        .items(&items)
        .default(0)
        .interact()?;

    take_selected(sessions, selection)
}

fn picker_label(s: &Session) -> String {
    format!(
        "{} | {:8} | {:<16} | \"{}\"",
        format_time(s.last_activity),
        s.status,
        truncate(&s.project_name, 16),
        truncate(&s.current_task, 60)
    )
}

/// The picked session itself; ids alone are not unique across projects.
fn take_selected(sessions: Vec<Session>, selection: usize) -> Result<Session> {
    sessions
        .into_iter()
        .nth(selection)
        .context("Selection out of range")
}

fn styled_status(status: SessionStatus) -> String {
    let label = format!("{:<8}", status);
    match status {
        SessionStatus::Working => label.bright_green().to_string(),
        SessionStatus::Idle => label.bright_yellow().to_string(),
        SessionStatus::Complete => label.dimmed().to_string(),
        SessionStatus::Error => label.bright_red().to_string(),
    }
}

fn print_sessions_table(sessions: &[Session]) {
    println!(
        "{:<16} {:<8} {:<16} {:<6} {:<8} {:<8} {}",
        "LAST ACTIVE".dimmed(),
        "STATUS".dimmed(),
        "PROJECT".dimmed(),
        "MSGS".dimmed(),
        "TOKENS".dimmed(),
        "COST".dimmed(),
        "TASK".dimmed(),
    );

    for s in sessions {
        println!(
            "{:<16} {} {:<16} {:<6} {:<8} {:<8} {}",
            format_time(s.last_activity),
            styled_status(s.status),
            truncate(&s.project_name, 16),
            s.message_count(),
            format_tokens(s.tokens_used.total),
            format_cost(s.tokens_used.estimated_cost),
            truncate(&s.current_task, 50)
        );
    }
}

fn print_session_detail(session: &Session) {
    println!("{}", "=== Session Detail ===".bright_blue().bold());
    println!("{}  {}", "ID:".dimmed(), session.id);
    println!("{}  {}", "Project:".dimmed(), session.project_name);
    println!("{}  {}", "Path:".dimmed(), session.project_path);
    if !session.git_branch.is_empty() {
        println!("{}  {}", "Branch:".dimmed(), session.git_branch);
    }
    if !session.git_worktree.is_empty() {
        println!("{}  {}", "Worktree:".dimmed(), session.git_worktree);
    }
    println!("{}  {}", "Model:".dimmed(), session.model);
    println!("{}  {}", "Status:".dimmed(), styled_status(session.status));
    println!("{}  {}", "Started:".dimmed(), format_time(session.start_time));
    println!(
        "{}  {}",
        "Last Activity:".dimmed(),
        format_time(session.last_activity)
    );
    if let (Some(start), Some(last)) = (session.start_time, session.last_activity) {
        let secs = last.signed_duration_since(start).num_milliseconds() as f64 / 1000.0;
        println!("{}  {}", "Duration:".dimmed(), format_duration(secs));
    }
    println!("{}  {}", "Messages:".dimmed(), session.message_count());
    println!();
    println!("{}", "Task:".dimmed());
    println!("  {}", session.current_task);
    println!();

    let t = &session.tokens_used;
    println!(
        "{}  {} in, {} out, {} cache write, {} cache read ({} total)",
        "Tokens:".dimmed(),
        format_tokens(t.input_tokens),
        format_tokens(t.output_tokens),
        format_tokens(t.cache_creation_tokens),
        format_tokens(t.cache_read_tokens),
        format_tokens(t.total)
    );
    println!(
        "{}  {}",
        "Estimated Cost:".dimmed(),
        format_cost(t.estimated_cost).bright_white()
    );

    if !session.files_modified.is_empty() {
        println!();
        println!(
            "{}",
            format!("--- Files Modified ({}) ---", session.files_modified.len()).dimmed()
        );
        for file in &session.files_modified {
            println!("  {}", file);
        }
    }

    let recent_start = session.records.len().saturating_sub(RECENT_MESSAGES);
    let recent = &session.records[recent_start..];
    if !recent.is_empty() {
        println!();
        println!("{}", "--- Recent Messages ---".dimmed());
        for record in recent {
            let who = if record.role.is_empty() {
                &record.record_type
            } else {
                &record.role
            };
            let who = match who.as_str() {
                "user" => who.bright_cyan().to_string(),
                "assistant" => who.bright_magenta().to_string(),
                _ => who.dimmed().to_string(),
            };
            println!(
                "  {} {} {}",
                record.timestamp.format("%H:%M:%S").to_string().dimmed(),
                who,
                truncate(&record.content, 100)
            );
        }
    }
}

fn print_projects_table(projects: &[ProjectAggregate]) {
    println!(
        "{:<20} {:<9} {:<7} {:<8} {:<9} {:<16} {}",
        "PROJECT".dimmed(),
        "SESSIONS".dimmed(),
        "ACTIVE".dimmed(),
        "TOKENS".dimmed(),
        "COST".dimmed(),
        "LAST ACTIVE".dimmed(),
        "PATH".dimmed(),
    );

    for p in projects {
        let active = if p.active_sessions > 0 {
            format!("{:<7}", p.active_sessions).bright_green().to_string()
        } else {
            format!("{:<7}", p.active_sessions)
        };
        println!(
            "{:<20} {:<9} {} {:<8} {:<9} {:<16} {}",
            truncate(&p.project_name, 20),
            p.session_count,
            active,
            format_tokens(p.tokens.total),
            format_cost(p.tokens.estimated_cost),
            format_time(p.last_activity),
            p.project_path.dimmed()
        );
    }
}

fn print_daily_table(metrics: &[DailyMetric]) {
    println!(
        "{:<12} {:<9} {:<9} {:<8} {:<9} {}",
        "DATE".dimmed(),
        "SESSIONS".dimmed(),
        "MESSAGES".dimmed(),
        "TOKENS".dimmed(),
        "COST".dimmed(),
        "MODELS".dimmed(),
    );

    for day in metrics {
        let models = day
            .model_usage
            .iter()
            .map(|(model, n)| format!("{}×{}", model, n))
            .collect::<Vec<_>>()
            .join(", ");
        let line = format!(
            "{:<12} {:<9} {:<9} {:<8} {:<9} {}",
            day.date.format("%Y-%m-%d").to_string(),
            day.session_count,
            day.message_count,
            format_tokens(day.tokens.total),
            format_cost(day.tokens.estimated_cost),
            models
        );
        if day.session_count == 0 {
            println!("{}", line.dimmed());
        } else {
            println!("{}", line);
        }
    }
}

fn print_models_table(usage: &[ModelUsage]) {
    let total: usize = usage.iter().map(|u| u.sessions).sum();
    println!(
        "{:<32} {:<9} {:<6} {:<8} {}",
        "MODEL".dimmed(),
        "SESSIONS".dimmed(),
        "SHARE".dimmed(),
        "TOKENS".dimmed(),
        "COST".dimmed(),
    );

    for u in usage {
        let share = if total == 0 {
            0.0
        } else {
            u.sessions as f64 * 100.0 / total as f64
        };
        println!(
            "{:<32} {:<9} {:<6} {:<8} {}",
            u.model,
            u.sessions,
            format!("{:.0}%", share),
            format_tokens(u.tokens.total),
            format_cost(u.tokens.estimated_cost)
        );
    }
}

fn print_peak_hours(peaks: &[PeakHour]) {
    println!("{}", "=== Peak Hours (UTC) ===".bright_blue().bold());
    let widest = peaks
        .iter()
        .map(|p| p.avg_sessions)
        .fold(0.0_f64, f64::max);
    for p in peaks {
        let width = if widest > 0.0 {
            ((p.avg_sessions / widest) * 30.0).round() as usize
        } else {
            0
        };
        println!(
            "  {:02}:00  {} {:.1} sessions/day",
            p.hour,
            "█".repeat(width.max(1)).bright_cyan(),
            p.avg_sessions
        );
    }
}

fn print_stats(stats: &SessionStats) {
    println!("{}", "=== Session Statistics ===".bright_blue().bold());
    println!("{}  {}", "Total Sessions:".dimmed(), stats.total_sessions);
    println!("{}  {}", "Active Sessions:".dimmed(), stats.active_sessions);
    println!(
        "{}  {}",
        "Total Tokens:".dimmed(),
        format_tokens(stats.tokens.total)
    );
    println!(
        "{}  {}",
        "Estimated Cost:".dimmed(),
        format_cost(stats.tokens.estimated_cost)
    );

    if !stats.by_status.is_empty() {
        println!();
        println!("{}", "By Status:".dimmed());
        for (status, count) in &stats.by_status {
            println!("  {:<12} {}", status, count);
        }
    }

    if !stats.sessions_over_time.is_empty() {
        println!();
        println!("{}", "Sessions Started:".dimmed());
        for day in &stats.sessions_over_time {
            println!("  {:<12} {}", day.date, day.count);
        }
    }
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn format_duration(secs: f64) -> String {
    if secs < 60.0 {
        format!("{:.0}s", secs)
    } else if secs < 3600.0 {
        let mins = (secs / 60.0).floor() as u64;
        let remaining_secs = (secs % 60.0) as u64;
        format!("{}m {}s", mins, remaining_secs)
    } else {
        let hours = (secs / 3600.0).floor() as u64;
        let mins = ((secs % 3600.0) / 60.0) as u64;
        format!("{}h {}m", hours, mins)
    }
}

fn format_tokens(n: u64) -> String {
    if n >= 1_000_000 {
        format!("{:.1}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.1}k", n as f64 / 1_000.0)
    } else {
        n.to_string()
    }
}

fn format_cost(cost: f64) -> String {
    format!("${:.2}", cost)
}

/// Single-line preview capped at `max` characters.
fn truncate(s: &str, max: usize) -> String {
    let flat = s.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > max {
        let head: String = flat.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    } else {
        flat
    }
}

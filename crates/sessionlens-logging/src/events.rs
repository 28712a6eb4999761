use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Live watch notifications, one per line of terminal output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LogEvent {
    WatchStarted {
        root: PathBuf,
        debounce_ms: u64,
        sessions: usize,
    },
    SessionCreated {
        session_id: String,
        project: String,
        model: String,
        status: String,
    },
    SessionUpdated {
        session_id: String,
        project: String,
        status: String,
        messages: usize,
        total_tokens: u64,
        current_task: String,
    },
    SessionDeleted {
        session_id: String,
    },
    SessionsRefreshed {
        total: usize,
        active: usize,
    },
    WatchStopped {
        duration_secs: f64,
    },
}

impl LogEvent {
    /// Add a timestamp to serialize with the event
    fn with_timestamp(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(obj) = value.as_object_mut() {
            obj.insert(
                "timestamp".to_string(),
                serde_json::Value::String(chrono::Utc::now().to_rfc3339()),
            );
        }
        value
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format with colors and visual structure
    #[default]
    Pretty,
    /// JSON lines format for machine consumption
    Json,
    /// Compact single-line format
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            "compact" => Ok(LogFormat::Compact),
            _ => Err(format!("Unknown log format: {}", s)),
        }
    }
}

/// Logger for watch events - handles both console output and file logging
pub struct Logger {
    format: LogFormat,
    file_writer: Option<Mutex<File>>,
}

impl Logger {
    pub fn new(format: LogFormat) -> Self {
        Self {
            format,
            file_writer: None,
        }
    }

    /// Create a logger with file output in addition to console
    pub fn with_file(format: LogFormat, log_path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;

        Ok(Self {
            format,
            file_writer: Some(Mutex::new(file)),
        })
    }

    pub fn format(&self) -> LogFormat {
        self.format
    }

    pub fn log(&self, event: &LogEvent) {
        // File output is always JSON
        if let Some(ref writer) = self.file_writer {
            if let Ok(mut file) = writer.lock() {
                let json = event.with_timestamp();
                let _ = writeln!(file, "{}", json);
            }
        }

        if let Some(text) = self.render(event) {
            let _ = writeln!(std::io::stderr(), "{}", text);
        }
    }

    /// Console text for an event, without the trailing newline.
    pub fn render(&self, event: &LogEvent) -> Option<String> {
        match self.format {
            LogFormat::Json => serde_json::to_string(event).ok(),
            LogFormat::Pretty => Some(Self::render_pretty(event)),
            LogFormat::Compact => Some(Self::render_compact(event)),
        }
    }

    fn render_pretty(event: &LogEvent) -> String {
        match event {
            LogEvent::WatchStarted {
                root,
                debounce_ms,
                sessions,
            } => {
                let border = "─".repeat(69);
                [
                    String::new(),
                    format!("╭{}╮", border).bright_blue().to_string(),
                    format!(
                        "{}  {}",
                        "│".bright_blue(),
                        Self::truncate_with_padding("sessionlens", 60, 68)
                            .bold()
                            .bright_white()
                    ),
                    format!(
                        "{}  {} {}",
                        "│".bright_blue(),
                        "Root:".dimmed(),
                        Self::truncate_with_padding(&root.display().to_string(), 60, 62)
                            .dimmed()
                    ),
                    format!(
                        "{}  {} {}",
                        "│".bright_blue(),
                        "Sessions:".dimmed(),
                        Self::truncate_with_padding(
                            &format!("{} (debounce {}ms)", sessions, debounce_ms),
                            55,
                            58
                        )
                        .dimmed()
                    ),
                    format!("╰{}╯", border).bright_blue().to_string(),
                ]
                .join("\n")
            }
            LogEvent::SessionCreated {
                session_id,
                project,
                model,
                status,
            } => format!(
                "  {} {} {} {} {}",
                "+".bright_green().bold(),
                session_id.bright_white(),
                Self::styled_status(status),
                project.bright_cyan(),
                model.dimmed()
            ),
            LogEvent::SessionUpdated {
                session_id,
                project,
                status,
                messages,
                total_tokens,
                current_task,
            } => {
                let mut line = format!(
                    "  {} {} {} {} {}",
                    "~".bright_yellow().bold(),
                    session_id.bright_white(),
                    Self::styled_status(status),
                    project.bright_cyan(),
                    format!(
                        "{} {}, {} tokens",
                        messages,
                        if *messages == 1 { "message" } else { "messages" },
                        total_tokens
                    )
                    .dimmed()
                );
                if !current_task.is_empty() {
                    line.push_str(&format!("\n    {} {}", "│".dimmed(), current_task));
                }
                line
            }
            LogEvent::SessionDeleted { session_id } => format!(
                "  {} {} {}",
                "-".bright_red().bold(),
                session_id.bright_white(),
                "removed".dimmed()
            ),
            LogEvent::SessionsRefreshed { total, active } => format!(
                "  {} {}",
                "↻".dimmed(),
                format!("{} sessions, {} active", total, active).dimmed()
            ),
            LogEvent::WatchStopped { duration_secs } => format!(
                "\n{} Stopped watching after {:.1}s",
                "■".bright_blue(),
                duration_secs
            ),
        }
    }

    fn render_compact(event: &LogEvent) -> String {
        let timestamp = chrono::Utc::now().format("%H:%M:%S");
        match event {
            LogEvent::WatchStarted { root, sessions, .. } => {
                format!("[{}] watch:start {} n={}", timestamp, root.display(), sessions)
            }
            LogEvent::SessionCreated {
                session_id,
                project,
                status,
                ..
            } => format!(
                "[{}] session:created:{} {} {}",
                timestamp, session_id, project, status
            ),
            LogEvent::SessionUpdated {
                session_id,
                status,
                messages,
                total_tokens,
                ..
            } => format!(
                "[{}] session:updated:{} {} msgs={} tok={}",
                timestamp, session_id, status, messages, total_tokens
            ),
            LogEvent::SessionDeleted { session_id } => {
                format!("[{}] session:deleted:{}", timestamp, session_id)
            }
            LogEvent::SessionsRefreshed { total, active } => {
                format!("[{}] sessions:{} active={}", timestamp, total, active)
            }
            LogEvent::WatchStopped { duration_secs } => {
                format!("[{}] watch:stop {:.1}s", timestamp, duration_secs)
            }
        }
    }

    fn styled_status(status: &str) -> String {
        let label = format!("[{}]", status);
        match status {
            "working" => label.bright_green().to_string(),
            "idle" => label.yellow().to_string(),
            "error" => label.bright_red().to_string(),
            _ => label.dimmed().to_string(),
        }
    }

    /// Truncate a string and pad to exact width
    fn truncate_with_padding(s: &str, max_len: usize, total_width: usize) -> String {
        let truncated = if s.chars().count() > max_len {
            let head: String = s.chars().take(max_len - 3).collect();
            format!("{}...", head)
        } else {
            s.to_string()
        };

        let padding_needed = total_width.saturating_sub(truncated.chars().count() + 1); // +1 for trailing │
        format!("{}{}│", truncated, " ".repeat(padding_needed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn deleted() -> LogEvent {
        LogEvent::SessionDeleted {
            session_id: "sess-1".to_string(),
        }
    }

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("compact".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_json_render_is_tagged() {
        let logger = Logger::new(LogFormat::Json);
        let text = logger.render(&deleted()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();

        assert_eq!(value["event"], "session_deleted");
        assert_eq!(value["session_id"], "sess-1");
    }

    #[test]
    fn test_compact_render() {
        let logger = Logger::new(LogFormat::Compact);
        let event = LogEvent::SessionUpdated {
            session_id: "sess-1".to_string(),
            project: "alpha".to_string(),
            status: "working".to_string(),
            messages: 12,
            total_tokens: 4500,
            current_task: "fix the login flow".to_string(),
        };

        let text = logger.render(&event).unwrap();

        assert!(text.ends_with("session:updated:sess-1 working msgs=12 tok=4500"));
    }

    #[test]
    fn test_pretty_render_includes_task() {
        let logger = Logger::new(LogFormat::Pretty);
        let event = LogEvent::SessionUpdated {
            session_id: "sess-1".to_string(),
            project: "alpha".to_string(),
            status: "idle".to_string(),
            messages: 1,
            total_tokens: 10,
            current_task: "fix the login flow".to_string(),
        };

        let text = logger.render(&event).unwrap();

        assert!(text.contains("sess-1"));
        assert!(text.contains("fix the login flow"));
        assert!(text.contains("message,"));
    }

    #[test]
    fn test_file_mirror_writes_json_with_timestamp() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs").join("watch.jsonl");

        let logger = Logger::with_file(LogFormat::Compact, &path).unwrap();
        logger.log(&deleted());
        logger.log(&LogEvent::SessionsRefreshed { total: 3, active: 1 });

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "session_deleted");
        assert!(lines[0]["timestamp"].is_string());
        assert_eq!(lines[1]["total"], 3);
    }

    #[test]
    fn test_truncate_with_padding_counts_chars() {
        let padded = Logger::truncate_with_padding("ünïcödé", 10, 12);
        assert_eq!(padded.chars().count(), 12);
        assert!(padded.ends_with('│'));

        let truncated = Logger::truncate_with_padding("abcdefghijklmnop", 10, 12);
        assert!(truncated.starts_with("abcdefg..."));
    }
}

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

use crate::error::{Result, SessionError};
use crate::types::{LogRecord, MetaValue, TokenCounts};

/// Offset-carrying formats tried after RFC 3339.
const OFFSET_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%z"];

/// Formats without an offset; these are read as UTC.
const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

const TOOL_RESULT_PREFIX: &str = "[tool_result]";

/// Parse a textual timestamp using the accepted formats in order.
///
/// RFC 3339 is tried first, then the offset formats, then the naive formats.
/// The first format that parses wins.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(raw, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }

    None
}

fn timestamp_from_meta(value: &MetaValue) -> Option<DateTime<Utc>> {
    match value {
        MetaValue::String(s) => parse_timestamp(s),
        // Numeric timestamps are epoch milliseconds.
        MetaValue::Number(n) if n.is_finite() && *n >= 0.0 => {
            Utc.timestamp_millis_opt(*n as i64).single()
        }
        _ => None,
    }
}

/// Parse one raw transcript line.
///
/// Returns `None` for blank lines, lines that are not a JSON object, and
/// `summary` records. When no timestamp format matches, the record is stamped
/// with the current time and flagged with `timestamp_estimated`; during a
/// backfill such records sort after everything that was written before them.
pub fn parse_record(line: &str) -> Option<LogRecord> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(error = %e, "Skipping malformed transcript line");
            return None;
        }
    };

    let mut fields = match MetaValue::from(value) {
        MetaValue::Map(map) => map,
        _ => {
            tracing::debug!("Skipping transcript line that is not an object");
            return None;
        }
    };

    let record_type = take_string(&mut fields, "type");
    if record_type == "summary" {
        return None;
    }

    let (timestamp, timestamp_estimated) = match fields
        .remove("timestamp")
        .as_ref()
        .and_then(timestamp_from_meta)
    {
        Some(ts) => (ts, false),
        None => {
            tracing::debug!(record_type = %record_type, "No parsable timestamp, using parse time");
            (Utc::now(), true)
        }
    };

    let message = fields.get("message");

    let role = message
        .and_then(|m| m.get("role"))
        .and_then(MetaValue::as_str)
        .or_else(|| fields.get("role").and_then(MetaValue::as_str))
        .unwrap_or_default()
        .to_string();

    let content = message
        .and_then(|m| m.get("content"))
        .map(flatten_content)
        .filter(|c| !c.is_empty())
        .or_else(|| fields.get("content").map(flatten_content))
        .unwrap_or_default();

    let usage = message
        .and_then(|m| m.get("usage"))
        .or_else(|| fields.get("usage"))
        .map(read_usage)
        .unwrap_or_default();

    Some(LogRecord {
        timestamp,
        timestamp_estimated,
        record_type,
        role,
        content,
        usage,
        raw_metadata: fields,
    })
}

/// Parse one raw line given as bytes. Invalid UTF-8 is replaced, not rejected.
pub fn parse_record_bytes(line: &[u8]) -> Option<LogRecord> {
    parse_record(&String::from_utf8_lossy(line))
}

/// Read every parsable record from a transcript file, in file order.
///
/// Malformed lines are skipped. An I/O failure while reading (for example the
/// file being removed mid-read) fails the whole file.
pub fn read_records(path: &Path) -> Result<Vec<LogRecord>> {
    let file = File::open(path).map_err(|source| SessionError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = BufReader::new(file);

    let mut records = Vec::new();
    let mut skipped = 0usize;
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let read = reader
            .read_until(b'\n', &mut buf)
            .map_err(|source| SessionError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        if read == 0 {
            break;
        }
        if buf.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        match parse_record_bytes(&buf) {
            Some(record) => records.push(record),
            None => skipped += 1,
        }
    }

    if skipped > 0 {
        tracing::debug!(path = %path.display(), skipped, "Skipped unparsable or summary lines");
    }

    Ok(records)
}

fn take_string(fields: &mut BTreeMap<String, MetaValue>, key: &str) -> String {
    match fields.remove(key) {
        Some(MetaValue::String(s)) => s,
        _ => String::new(),
    }
}

/// Flatten message content (plain string or content-block list) to text.
fn flatten_content(value: &MetaValue) -> String {
    match value {
        MetaValue::String(s) => s.clone(),
        MetaValue::List(blocks) => blocks
            .iter()
            .filter_map(flatten_block)
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

fn flatten_block(block: &MetaValue) -> Option<String> {
    if let MetaValue::String(s) = block {
        return Some(s.clone());
    }

    let kind = block.get("type").and_then(MetaValue::as_str).unwrap_or("");
    match kind {
        "text" => block
            .get("text")
            .and_then(MetaValue::as_str)
            .map(str::to_string),
        "tool_result" => {
            let inner = block.get("content").map(flatten_content).unwrap_or_default();
            Some(format!("{} {}", TOOL_RESULT_PREFIX, inner).trim_end().to_string())
        }
        "tool_use" => {
            let name = block.get("name").and_then(MetaValue::as_str).unwrap_or("unknown");
            Some(format!("[tool_use: {}]", name))
        }
        "thinking" | "image" => None,
        _ => block
            .get("text")
            .and_then(MetaValue::as_str)
            .map(str::to_string),
    }
}

fn read_usage(usage: &MetaValue) -> TokenCounts {
    let counter = |key: &str| usage.get(key).and_then(MetaValue::as_u64).unwrap_or(0);
    TokenCounts {
        input: counter("input_tokens"),
        output: counter("output_tokens"),
        cache_creation: counter("cache_creation_input_tokens"),
        cache_read: counter("cache_read_input_tokens"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2026, 1, 20, 10, 0, 0).unwrap();

        assert_eq!(parse_timestamp("2026-01-20T10:00:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2026-01-20T12:00:00+02:00"), Some(expected));
        assert_eq!(parse_timestamp("2026-01-20T10:00:00+0000"), Some(expected));
        assert_eq!(parse_timestamp("2026-01-20T10:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2026-01-20 10:00:00"), Some(expected));
        assert_eq!(parse_timestamp("yesterday"), None);
        assert_eq!(parse_timestamp(""), None);
    }

    #[test]
    fn test_parse_timestamp_keeps_fraction() {
        let ts = parse_timestamp("2026-01-20T10:00:00.250Z").unwrap();
        assert_eq!(ts.nanosecond(), 250_000_000);
    }

    #[test]
    fn test_parse_record_claude_message() {
        let line = r#"{"type":"assistant","timestamp":"2026-01-20T10:00:00Z","sessionId":"abc","message":{"role":"assistant","model":"claude-sonnet-4-20250514","content":[{"type":"text","text":"Done."}],"usage":{"input_tokens":10,"output_tokens":20,"cache_creation_input_tokens":30,"cache_read_input_tokens":40}}}"#;

        let record = parse_record(line).unwrap();

        assert_eq!(record.record_type, "assistant");
        assert_eq!(record.role, "assistant");
        assert_eq!(record.content, "Done.");
        assert!(!record.timestamp_estimated);
        assert_eq!(
            record.usage,
            TokenCounts {
                input: 10,
                output: 20,
                cache_creation: 30,
                cache_read: 40
            }
        );
        assert!(record.raw_metadata.contains_key("message"));
        assert!(record.raw_metadata.contains_key("sessionId"));
        assert!(!record.raw_metadata.contains_key("type"));
    }

    #[test]
    fn test_parse_record_missing_usage_fields_default_to_zero() {
        let line = r#"{"type":"assistant","timestamp":"2026-01-20T10:00:00Z","message":{"role":"assistant","content":"hi","usage":{"output_tokens":7}}}"#;

        let record = parse_record(line).unwrap();

        assert_eq!(record.usage.output, 7);
        assert_eq!(record.usage.input, 0);
        assert_eq!(record.usage.cache_read, 0);
    }

    #[test]
    fn test_parse_record_rejects_malformed_and_summary() {
        assert!(parse_record("{not json").is_none());
        assert!(parse_record("[1,2,3]").is_none());
        assert!(parse_record("   ").is_none());
        assert!(parse_record(r#"{"type":"summary","summary":"Fix bug","leafUuid":"x"}"#).is_none());
    }

    #[test]
    fn test_parse_record_timestamp_fallback_is_flagged() {
        let before = Utc::now();
        let record = parse_record(r#"{"type":"user","timestamp":"not a time","content":"x"}"#).unwrap();

        assert!(record.timestamp_estimated);
        assert!(record.timestamp >= before);
    }

    #[test]
    fn test_parse_record_epoch_millis() {
        let record = parse_record(r#"{"type":"user","timestamp":1768903200000}"#).unwrap();
        assert_eq!(
            record.timestamp,
            Utc.with_ymd_and_hms(2026, 1, 20, 10, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_parse_record_flattens_tool_blocks() {
        let line = r#"{"type":"user","timestamp":"2026-01-20T10:00:00Z","message":{"role":"user","content":[{"type":"tool_result","tool_use_id":"t1","content":"ok"}]}}"#;

        let record = parse_record(line).unwrap();

        assert_eq!(record.role, "user");
        assert_eq!(record.content, "[tool_result] ok");
    }

    #[test]
    fn test_parse_record_top_level_role_and_content() {
        let record =
            parse_record(r#"{"type":"message","role":"system","content":"boot","timestamp":"2026-01-20T10:00:00Z"}"#)
                .unwrap();

        assert_eq!(record.role, "system");
        assert_eq!(record.content, "boot");
    }

    #[test]
    fn test_parse_record_bytes_tolerates_invalid_utf8() {
        let mut line = br#"{"type":"user","content":"caf"#.to_vec();
        line.push(0xff);
        line.extend_from_slice(br#"","timestamp":"2026-01-20T10:00:00Z"}"#);

        let record = parse_record_bytes(&line).unwrap();

        assert!(record.content.starts_with("caf"));
    }
}

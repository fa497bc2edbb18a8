//! Output-log retrieval and smart truncation (§4.9): an agent's stream log
//! is an append-only JSONL file that can run into the tens of megabytes
//! over a long session, so `get_agent_output` never returns it verbatim.
//! Truncation happens at three levels: per-line length, tool-result content
//! (the usual offender — a `cat` of a large file embedded in a tool
//! result), and, if a `max_bytes` budget is still exceeded after that, a
//! first-N/last-N line sample with the dropped middle marked explicitly.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde_json::Value;

use crate::config::OutputConfig;

/// How much of the log `get_agent_output` returns, from least to most
/// processed. Mirrors the RPC surface's `response_format` parameter (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseFormat {
    /// The last [`RECENT_TAIL_LINES`] lines, truncated per-field.
    #[default]
    Recent,
    /// Every line, truncated per-field. Can still be large.
    Full,
    /// The last [`COMPACT_TAIL_LINES`] lines, condensed to one summary line
    /// per event instead of the raw JSON.
    Compact,
    /// Event-type counts plus the final `result` event only.
    Summary,
}

impl FromStr for ResponseFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "recent" => Ok(Self::Recent),
            "full" => Ok(Self::Full),
            "compact" => Ok(Self::Compact),
            "summary" => Ok(Self::Summary),
            other => Err(format!("unknown response_format {other:?}, expected recent|full|compact|summary")),
        }
    }
}

impl fmt::Display for ResponseFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Recent => "recent",
            Self::Full => "full",
            Self::Compact => "compact",
            Self::Summary => "summary",
        };
        write!(f, "{s}")
    }
}

const RECENT_TAIL_LINES: usize = 200;
const COMPACT_TAIL_LINES: usize = 50;
/// Above this ratio of non-printable bytes in a sample, the log is treated
/// as binary content rather than JSONL and replaced with a placeholder.
const BINARY_NON_PRINTABLE_RATIO: f64 = 0.3;
const BINARY_SAMPLE_BYTES: usize = 8192;

#[derive(Debug, Clone, Copy)]
pub struct OutputRequest {
    pub format: ResponseFormat,
    pub max_bytes: Option<usize>,
}

impl Default for OutputRequest {
    fn default() -> Self {
        Self { format: ResponseFormat::Recent, max_bytes: None }
    }
}

/// Read and truncate `stream_log_path` per `request`. Missing files return
/// an empty string rather than an error — an agent that hasn't written its
/// first line yet is a normal, queryable state.
pub fn read_agent_output(stream_log_path: &Path, request: &OutputRequest, config: &OutputConfig) -> std::io::Result<String> {
    let raw = match std::fs::read(stream_log_path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(String::new()),
        Err(e) => return Err(e),
    };

    if looks_binary(&raw) {
        return Ok(format!("[binary content, {} bytes omitted]", raw.len()));
    }

    let text = String::from_utf8_lossy(&raw);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();

    let body = match request.format {
        ResponseFormat::Recent => render_recent(&lines, config),
        ResponseFormat::Full => render_full(&lines, config),
        ResponseFormat::Compact => render_compact(&lines),
        ResponseFormat::Summary => render_summary(&lines),
    };

    Ok(match request.max_bytes {
        Some(cap) => sample_to_byte_budget(&body, cap),
        None => body,
    })
}

fn render_full(lines: &[&str], config: &OutputConfig) -> String {
    lines.iter().map(|l| truncate_event_line(l, config)).collect::<Vec<_>>().join("\n")
}

fn render_recent(lines: &[&str], config: &OutputConfig) -> String {
    let start = lines.len().saturating_sub(RECENT_TAIL_LINES);
    render_full(&lines[start..], config)
}

/// One human-readable summary line per event instead of the raw JSON,
/// which is most of what `compact` buys over `recent`.
fn render_compact(lines: &[&str]) -> String {
    let start = lines.len().saturating_sub(COMPACT_TAIL_LINES);
    lines[start..].iter().map(|l| compact_summary_line(l)).collect::<Vec<_>>().join("\n")
}

fn compact_summary_line(line: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(line) else {
        return truncate_line(line, 200);
    };
    let event_type = value.get("type").and_then(Value::as_str).unwrap_or("unknown");
    let detail = match event_type {
        "assistant" | "user" => value.get("text").or_else(|| value.get("content")).and_then(Value::as_str).unwrap_or("").to_string(),
        "tool_call" => value.get("name").or_else(|| value.get("tool")).and_then(Value::as_str).unwrap_or("").to_string(),
        "tool_result" => format!("{} chars", content_len(&value)),
        "result" => value.get("summary").and_then(Value::as_str).unwrap_or("").to_string(),
        _ => String::new(),
    };
    format!("[{event_type}] {}", truncate_line(&detail, 150))
}

fn content_len(value: &Value) -> usize {
    value.get("content").and_then(Value::as_str).map(str::len).unwrap_or(0)
}

/// Event-type counts across the whole log, plus the final `result` event if
/// one exists — the cheapest useful answer to "what happened in this run".
fn render_summary(lines: &[&str]) -> String {
    let mut counts = std::collections::BTreeMap::new();
    let mut last_result: Option<String> = None;

    for line in lines {
        let Ok(value) = serde_json::from_str::<Value>(line) else { continue };
        let event_type = value.get("type").and_then(Value::as_str).unwrap_or("unknown").to_string();
        *counts.entry(event_type.clone()).or_insert(0usize) += 1;
        if event_type == "result" {
            last_result = Some(line.to_string());
        }
    }

    let mut out = String::from("## Event counts\n\n");
    for (event_type, count) in &counts {
        out.push_str(&format!("- {event_type}: {count}\n"));
    }
    if let Some(result) = last_result {
        out.push_str("\n## Final result\n\n");
        out.push_str(&result);
        out.push('\n');
    }
    out
}

/// Truncate one JSONL line: parse it, cap any `tool_result` content and any
/// embedded coordination-info block, then cap the serialized line length as
/// a backstop for anything the field-level caps missed.
fn truncate_event_line(line: &str, config: &OutputConfig) -> String {
    match serde_json::from_str::<Value>(line) {
        Ok(mut value) => {
            truncate_tool_result_content(&mut value, config.max_tool_result_content);
            if let Some(coordination) = value.get_mut("coordination_info") {
                truncate_coordination_info(coordination, config);
            }
            let rendered = serde_json::to_string(&value).unwrap_or_else(|_| line.to_string());
            truncate_line(&rendered, config.max_line_length)
        }
        Err(_) => truncate_line(line, config.max_line_length),
    }
}

/// Cap a single line to `max_len` chars: keep a head, a middle-ellipsis
/// marker naming how much was dropped, and a short tail so the line's shape
/// (e.g. a closing brace) is still visible.
pub fn truncate_line(line: &str, max_len: usize) -> String {
    if line.chars().count() <= max_len {
        return line.to_string();
    }
    let suffix_len = (max_len / 10).clamp(10, 80);
    let head_len = max_len.saturating_sub(suffix_len);
    let head: String = line.chars().take(head_len).collect();
    let tail: String = line.chars().rev().take(suffix_len).collect::<Vec<_>>().into_iter().rev().collect();
    let omitted = line.chars().count() - head_len - suffix_len;
    format!("{head}...[{omitted} chars omitted]...{tail}")
}

/// If `value` is a `tool_result` event, cap its `content` field to
/// `max_len` chars using the same preview/ellipsis/suffix shape as
/// [`truncate_line`]. A no-op for every other event type or shape.
fn truncate_tool_result_content(value: &mut Value, max_len: usize) {
    let is_tool_result = value.get("type").and_then(Value::as_str) == Some("tool_result");
    if !is_tool_result {
        return;
    }
    if let Some(content) = value.get_mut("content") {
        if let Some(s) = content.as_str() {
            if s.chars().count() > max_len {
                *content = Value::String(truncate_line(s, max_len));
            }
        }
    }
}

/// Structure-aware truncation for an embedded coordination-info block (a
/// peer-task snapshot occasionally folded into a stream event): caps the
/// count of recent findings/progress entries/sample agents rather than
/// treating the block as opaque text, and marks `_truncated` when it had to
/// drop anything so a reader knows the counts aren't exhaustive.
fn truncate_coordination_info(value: &mut Value, config: &OutputConfig) {
    let Some(obj) = value.as_object_mut() else { return };
    let mut truncated = false;

    for (key, cap) in [
        ("recent_findings", config.coordination_max_findings),
        ("recent_progress", config.coordination_max_progress),
        ("sample_agents", config.coordination_max_agents),
    ] {
        if let Some(Value::Array(items)) = obj.get_mut(key) {
            if items.len() > cap {
                items.truncate(cap);
                truncated = true;
            }
        }
    }

    if truncated {
        obj.insert("_truncated".to_string(), Value::Bool(true));
    }
}

/// When the formatted body still exceeds `max_bytes`, keep the first and
/// last halves of the byte budget (split on line boundaries) and replace
/// the dropped middle with a marker line, rather than hard-truncating at an
/// arbitrary byte offset.
fn sample_to_byte_budget(body: &str, max_bytes: usize) -> String {
    if body.len() <= max_bytes {
        return body.to_string();
    }

    let lines: Vec<&str> = body.lines().collect();
    let half_budget = max_bytes / 2;

    let mut head = String::new();
    let mut head_lines = 0;
    for line in &lines {
        if head.len() + line.len() + 1 > half_budget {
            break;
        }
        head.push_str(line);
        head.push('\n');
        head_lines += 1;
    }

    let mut tail = String::new();
    let mut tail_lines = 0;
    for line in lines.iter().rev() {
        if tail.len() + line.len() + 1 > half_budget {
            break;
        }
        tail.insert_str(0, "\n");
        tail.insert_str(0, line);
        tail_lines += 1;
    }

    let omitted = lines.len().saturating_sub(head_lines + tail_lines);
    format!("{head}\n--- [{omitted} lines omitted, {max_bytes} byte budget] ---\n\n{tail}")
}

fn looks_binary(bytes: &[u8]) -> bool {
    let sample = &bytes[..bytes.len().min(BINARY_SAMPLE_BYTES)];
    if sample.is_empty() {
        return false;
    }
    let non_printable = sample.iter().filter(|&&b| b != b'\n' && b != b'\t' && b != b'\r' && (b < 0x20 || b == 0x7f)).count();
    (non_printable as f64 / sample.len() as f64) > BINARY_NON_PRINTABLE_RATIO
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> OutputConfig {
        OutputConfig { max_line_length: 200, max_tool_result_content: 50, coordination_max_findings: 2, coordination_max_progress: 2, coordination_max_agents: 1 }
    }

    #[test]
    fn response_format_parses_known_values() {
        assert_eq!("recent".parse::<ResponseFormat>().unwrap(), ResponseFormat::Recent);
        assert_eq!("summary".parse::<ResponseFormat>().unwrap(), ResponseFormat::Summary);
        assert!("nonsense".parse::<ResponseFormat>().is_err());
    }

    #[test]
    fn truncate_line_keeps_head_and_tail() {
        let long = "x".repeat(1000);
        let out = truncate_line(&long, 100);
        assert!(out.len() < 1000);
        assert!(out.starts_with('x'));
        assert!(out.ends_with('x'));
        assert!(out.contains("chars omitted"));
    }

    #[test]
    fn truncate_line_is_a_no_op_under_the_cap() {
        assert_eq!(truncate_line("short", 100), "short");
    }

    #[test]
    fn truncate_tool_result_content_caps_only_tool_result_events() {
        let mut tool_result = serde_json::json!({"type": "tool_result", "content": "y".repeat(500)});
        truncate_tool_result_content(&mut tool_result, 50);
        assert!(tool_result["content"].as_str().unwrap().len() < 500);

        let mut other = serde_json::json!({"type": "assistant", "content": "y".repeat(500)});
        truncate_tool_result_content(&mut other, 50);
        assert_eq!(other["content"].as_str().unwrap().len(), 500);
    }

    #[test]
    fn truncate_coordination_info_caps_counts_and_marks_truncated() {
        let mut info = serde_json::json!({
            "recent_findings": ["a", "b", "c", "d"],
            "recent_progress": ["p1"],
            "sample_agents": ["a1", "a2"],
        });
        truncate_coordination_info(&mut info, &config());
        assert_eq!(info["recent_findings"].as_array().unwrap().len(), 2);
        assert_eq!(info["recent_progress"].as_array().unwrap().len(), 1);
        assert_eq!(info["sample_agents"].as_array().unwrap().len(), 1);
        assert_eq!(info["_truncated"], Value::Bool(true));
    }

    #[test]
    fn read_agent_output_returns_empty_for_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = read_agent_output(&dir.path().join("missing.jsonl"), &OutputRequest::default(), &config()).unwrap();
        assert_eq!(out, "");
    }

    #[test]
    fn read_agent_output_recent_tail_caps_line_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.jsonl");
        let mut content = String::new();
        for i in 0..(RECENT_TAIL_LINES + 50) {
            content.push_str(&format!("{{\"type\":\"assistant\",\"text\":\"turn {i}\"}}\n"));
        }
        std::fs::write(&path, content).unwrap();

        let out = read_agent_output(&path, &OutputRequest { format: ResponseFormat::Recent, max_bytes: None }, &config()).unwrap();
        assert_eq!(out.lines().count(), RECENT_TAIL_LINES);
        assert!(out.contains(&format!("turn {}", RECENT_TAIL_LINES + 49)));
    }

    #[test]
    fn read_agent_output_detects_binary_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.jsonl");
        let bytes: Vec<u8> = (0..4096u32).map(|i| (i % 256) as u8).collect();
        std::fs::write(&path, &bytes).unwrap();

        let out = read_agent_output(&path, &OutputRequest::default(), &config()).unwrap();
        assert!(out.starts_with("[binary content,"));
    }

    #[test]
    fn sample_to_byte_budget_keeps_head_and_tail() {
        let body: String = (0..1000).map(|i| format!("line {i}\n")).collect();
        let sampled = sample_to_byte_budget(&body, 500);
        assert!(sampled.len() < body.len());
        assert!(sampled.starts_with("line 0"));
        assert!(sampled.contains("line 999"));
        assert!(sampled.contains("lines omitted"));
    }
}

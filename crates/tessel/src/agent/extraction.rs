//! Recovering tool calls from response text.
//!
//! Some backends have no native tool calling and describe the call in
//! prose instead. Two shapes are recognized:
//!
//! - a JSON object with a `name` and an `arguments` (or `input` /
//!   `parameters`) field, bare or inside a fenced block;
//! - a fenced shell block (```` ```bash ````), which becomes a `bash` call.
//!
//! Only names the registry advertises are accepted. Finding nothing is not
//! an error: the turn simply ends as a plain answer.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::ToolCall;
use crate::tools::names;

static SHELL_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:bash|sh|shell|console)[ \t]*\r?\n(.*?)```")
        .expect("shell fence regex is valid")
});

const ARGUMENT_KEYS: &[&str] = &["arguments", "input", "parameters"];

/// Tool calls found in `text`, limited to `known_tools`.
pub fn extract_tool_calls(text: &str, known_tools: &HashSet<String>) -> Vec<ToolCall> {
    let mut calls: Vec<ToolCall> = json_objects(text)
        .into_iter()
        .filter_map(|obj| call_from_object(obj, known_tools))
        .collect();

    if calls.is_empty() && known_tools.contains(names::BASH) {
        calls = SHELL_FENCE
            .captures_iter(text)
            .filter_map(|cap| {
                let command = shell_command(cap.get(1)?.as_str());
                if command.is_empty() {
                    return None;
                }
                let mut input = Map::new();
                input.insert("command".into(), Value::String(command));
                Some(ToolCall::new("", names::BASH, Value::Object(input)).extracted())
            })
            .collect();
    }

    for (i, call) in calls.iter_mut().enumerate() {
        call.id = format!("extracted_{}", i + 1);
    }
    calls
}

/// Every top-level JSON object that parses, in order of appearance.
fn json_objects(text: &str) -> Vec<Map<String, Value>> {
    let mut found = Vec::new();
    let mut cursor = 0;
    while let Some(rest) = text.get(cursor..) {
        let Some(offset) = rest.find('{') else { break };
        let start = cursor + offset;
        let Some(candidate) = text.get(start..) else { break };

        let mut stream = serde_json::Deserializer::from_str(candidate).into_iter::<Value>();
        match stream.next() {
            Some(Ok(Value::Object(obj))) => {
                cursor = start + stream.byte_offset();
                found.push(obj);
            }
            _ => cursor = start + 1,
        }
    }
    found
}

fn call_from_object(mut obj: Map<String, Value>, known_tools: &HashSet<String>) -> Option<ToolCall> {
    let name = obj.get("name")?.as_str()?.to_string();
    if !known_tools.contains(&name) {
        return None;
    }
    let args = ARGUMENT_KEYS.iter().find_map(|k| obj.remove(*k))?;
    let input = match args {
        Value::Object(_) => args,
        // OpenAI-style arguments arrive as a JSON string.
        Value::String(raw) => match serde_json::from_str::<Value>(&raw).ok()? {
            v @ Value::Object(_) => v,
            _ => return None,
        },
        _ => return None,
    };
    Some(ToolCall::new("", name, input).extracted())
}

/// Script lines with prompt markers and blank lines removed.
fn shell_command(block: &str) -> String {
    block
        .lines()
        .map(|line| line.trim_end())
        .map(|line| line.strip_prefix("$ ").unwrap_or(line))
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolCallOrigin;
    use serde_json::json;

    fn known() -> HashSet<String> {
        ["read_file", "bash"].iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn json_call_in_prose() {
        let text = r#"I'll read it: {"name": "read_file", "arguments": {"path": "src/lib.rs"}} now."#;
        let calls = extract_tool_calls(text, &known());
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "read_file");
        assert_eq!(calls[0].input, json!({"path": "src/lib.rs"}));
        assert_eq!(calls[0].id, "extracted_1");
        assert_eq!(calls[0].origin, ToolCallOrigin::Extracted);
    }

    #[test]
    fn string_arguments_and_fenced_json() {
        let text = "```json\n{\"name\": \"read_file\", \"arguments\": \"{\\\"path\\\": \\\"a.rs\\\"}\"}\n```\n\
                    then {\"name\": \"bash\", \"input\": {\"command\": \"ls\"}}";
        let calls = extract_tool_calls(text, &known());
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].input, json!({"path": "a.rs"}));
        assert_eq!(calls[1].id, "extracted_2");
    }

    #[test]
    fn unknown_tools_and_lookalikes_are_ignored() {
        let text = r#"Config looks like {"name": "demo", "version": 2} and {"name": "delete_all", "arguments": {}}"#;
        assert!(extract_tool_calls(text, &known()).is_empty());
        assert!(extract_tool_calls("just { a brace", &known()).is_empty());
    }

    #[test]
    fn shell_fence_becomes_bash() {
        let text = "Run this:\n```bash\n$ cargo test\n\n```\nand report.";
        let calls = extract_tool_calls(text, &known());
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "bash");
        assert_eq!(calls[0].input, json!({"command": "cargo test"}));
        assert_eq!(calls[0].origin, ToolCallOrigin::Extracted);

        let no_bash: HashSet<String> = ["read_file".to_string()].into();
        assert!(extract_tool_calls(text, &no_bash).is_empty());
    }
}

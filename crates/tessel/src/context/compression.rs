//! Reversible entity compression of outgoing requests.
//!
//! Long strings that recur across the outgoing messages (file paths, long
//! identifiers) are replaced by short references like `[E1]`, and a legend
//! mapping references back to values is prepended to the system prompt for
//! that request. The substitution only happens when it pays for itself:
//! compressed messages plus legend must be strictly smaller than the
//! original.
//!
//! Responses are decompressed on the way back. [`DecompressingSink`] wraps a
//! [`StreamSink`] and holds back any chunk tail that could be the start of a
//! reference, so a reference split across chunks is never emitted half-way.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::api::StreamSink;
use crate::{Content, ContentBlock, Message};

static REFERENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[E(\d+)\]").expect("reference regex is valid"));

static CANDIDATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:[\w.\-~]+/)+[\w.\-]+|[A-Za-z_][A-Za-z0-9_]*(?:::[A-Za-z_][A-Za-z0-9_]*)+|[A-Za-z_][A-Za-z0-9_]{2,}")
        .expect("candidate regex is valid")
});

/// Longest chunk tail held back while waiting for a reference to complete.
const MAX_PENDING_REFERENCE: usize = 12;

const LEGEND_HEADER: &str = "## Entity References\n";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct CompressionConfig {
    pub enabled: bool,
    /// Shortest value worth abbreviating, in bytes.
    pub min_entity_length: usize,
    /// Fewest occurrences before a value is considered.
    pub min_occurrences: usize,
    pub max_entities: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_entity_length: 16,
            min_occurrences: 2,
            max_entities: 64,
        }
    }
}

/// One abbreviated value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionEntity {
    /// `E1`, `E2`, ...
    pub id: String,
    pub value: String,
    pub occurrences: usize,
    /// Bytes saved net of the legend entry.
    pub savings: usize,
}

impl CompressionEntity {
    pub fn reference(&self) -> String {
        format!("[{}]", self.id)
    }

    fn legend_line(&self) -> String {
        format!("{} = {}\n", self.reference(), self.value)
    }
}

/// Entities chosen for one request/response cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityMap {
    entities: Vec<CompressionEntity>,
}

impl EntityMap {
    pub fn entities(&self) -> &[CompressionEntity] {
        &self.entities
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn total_savings(&self) -> usize {
        self.entities.iter().map(|e| e.savings).sum()
    }

    pub fn legend(&self) -> String {
        if self.entities.is_empty() {
            return String::new();
        }
        let mut legend = String::from(LEGEND_HEADER);
        for entity in &self.entities {
            legend.push_str(&entity.legend_line());
        }
        legend
    }

    /// Substitute every entity, in selection order.
    pub fn compress(&self, text: &str) -> String {
        let mut out = text.to_string();
        for entity in &self.entities {
            if out.contains(&entity.value) {
                out = out.replace(&entity.value, &entity.reference());
            }
        }
        out
    }

    /// Expand every known reference. Unknown references are left alone.
    pub fn decompress(&self, text: &str) -> String {
        if self.entities.is_empty() || !text.contains("[E") {
            return text.to_string();
        }
        REFERENCE_RE
            .replace_all(text, |caps: &regex::Captures<'_>| {
                let id = &caps[0][1..caps[0].len() - 1];
                self.entities
                    .iter()
                    .find(|e| e.id == id)
                    .map_or_else(|| caps[0].to_string(), |e| e.value.clone())
            })
            .into_owned()
    }

    /// Expand references inside every string of a JSON value.
    pub fn decompress_value(&self, value: &mut Value) {
        match value {
            Value::String(s) => {
                if REFERENCE_RE.is_match(s) {
                    *s = self.decompress(s);
                }
            }
            Value::Array(items) => items.iter_mut().for_each(|v| self.decompress_value(v)),
            Value::Object(map) => map.values_mut().for_each(|v| self.decompress_value(v)),
            _ => {}
        }
    }
}

/// Messages rewritten for one request, with the map to undo it.
#[derive(Debug, Clone)]
pub struct CompressedRequest {
    pub messages: Vec<Message>,
    pub map: EntityMap,
    pub original_bytes: usize,
    /// Compressed messages plus legend.
    pub compressed_bytes: usize,
}

/// Compress `messages` for sending. Returns `None` when nothing qualifies
/// or when the result would not be strictly smaller.
pub fn compress_messages(messages: &[Message], config: &CompressionConfig) -> Option<CompressedRequest> {
    let texts: Vec<&str> = messages.iter().flat_map(compressible_texts).collect();
    if texts.iter().any(|t| REFERENCE_RE.is_match(t)) {
        debug!("Skipping compression: history already contains reference-shaped text");
        return None;
    }
    let original_bytes: usize = texts.iter().map(|t| t.len()).sum();

    let map = select_entities(&texts, config);
    if map.is_empty() {
        return None;
    }

    let compressed: Vec<Message> = messages.iter().map(|m| compress_message(m, &map)).collect();
    let compressed_bytes = compressed
        .iter()
        .flat_map(compressible_texts)
        .map(str::len)
        .sum::<usize>()
        + map.legend().len();

    if compressed_bytes >= original_bytes {
        debug!(
            "Skipping compression: {compressed_bytes} bytes with legend vs {original_bytes} original"
        );
        return None;
    }
    debug!(
        "Compressed {} entities: {original_bytes} -> {compressed_bytes} bytes",
        map.entities.len()
    );
    Some(CompressedRequest {
        messages: compressed,
        map,
        original_bytes,
        compressed_bytes,
    })
}

/// Greedy, longest-first selection of entities with positive net savings.
fn select_entities(texts: &[&str], config: &CompressionConfig) -> EntityMap {
    let mut candidates: Vec<&str> = texts
        .iter()
        .copied()
        .flat_map(|t| CANDIDATE_RE.find_iter(t).map(|m| m.as_str()))
        .filter(|c| c.len() >= config.min_entity_length)
        .collect();
    candidates.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    candidates.dedup();

    let mut working: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
    let mut map = EntityMap::default();
    for value in candidates {
        if map.entities.len() >= config.max_entities {
            break;
        }
        let occurrences: usize = working.iter().map(|t| t.matches(value).count()).sum();
        if occurrences < config.min_occurrences.max(1) {
            continue;
        }
        let entity = CompressionEntity {
            id: format!("E{}", map.entities.len() + 1),
            value: value.to_string(),
            occurrences,
            savings: 0,
        };
        let reference_len = entity.reference().len();
        let gross = occurrences * value.len().saturating_sub(reference_len);
        let cost = entity.legend_line().len();
        if gross <= cost {
            continue;
        }
        let reference = entity.reference();
        for text in working.iter_mut() {
            if text.contains(value) {
                *text = text.replace(value, &reference);
            }
        }
        map.entities.push(CompressionEntity {
            savings: gross - cost,
            ..entity
        });
    }
    map
}

fn compressible_texts(message: &Message) -> Vec<&str> {
    match &message.content {
        Content::Text(t) => vec![t.as_str()],
        Content::Blocks(blocks) => blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::ToolResult { content, .. } => Some(content.as_str()),
                _ => None,
            })
            .collect(),
    }
}

fn compress_message(message: &Message, map: &EntityMap) -> Message {
    let content = match &message.content {
        Content::Text(t) => Content::Text(map.compress(t)),
        Content::Blocks(blocks) => Content::Blocks(
            blocks
                .iter()
                .map(|b| match b {
                    ContentBlock::Text { text } => ContentBlock::Text {
                        text: map.compress(text),
                    },
                    ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                        is_error,
                    } => ContentBlock::ToolResult {
                        tool_use_id: tool_use_id.clone(),
                        content: map.compress(content),
                        is_error: *is_error,
                    },
                    other => other.clone(),
                })
                .collect(),
        ),
    };
    Message {
        role: message.role,
        content,
    }
}

// ── Streaming decompression ───────────────────────────────────────

/// Incremental decompressor that never emits a partial reference.
#[derive(Debug)]
pub struct StreamDecompressor<'m> {
    map: &'m EntityMap,
    pending: String,
}

impl<'m> StreamDecompressor<'m> {
    pub fn new(map: &'m EntityMap) -> Self {
        Self {
            map,
            pending: String::new(),
        }
    }

    /// Feed a chunk; returns the text safe to emit now.
    pub fn push(&mut self, chunk: &str) -> String {
        self.pending.push_str(chunk);
        let hold_from = partial_reference_start(&self.pending).unwrap_or(self.pending.len());
        let ready: String = self.pending.drain(..hold_from).collect();
        self.map.decompress(&ready)
    }

    /// Flush whatever is still held.
    pub fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.pending);
        self.map.decompress(&rest)
    }
}

/// Byte offset of a trailing `[`, `[E` or `[E<digits>` that may still grow
/// into a reference.
fn partial_reference_start(text: &str) -> Option<usize> {
    let start = text.rfind('[')?;
    let tail = &text[start + 1..];
    if tail.len() >= MAX_PENDING_REFERENCE {
        return None;
    }
    let possible = match tail.strip_prefix('E') {
        None => tail.is_empty(),
        Some(digits) => digits.bytes().all(|b| b.is_ascii_digit()),
    };
    possible.then_some(start)
}

/// [`StreamSink`] adapter that decompresses text and reasoning on the fly.
pub struct DecompressingSink<'a> {
    inner: &'a mut (dyn StreamSink + Send),
    text: StreamDecompressor<'a>,
    reasoning: StreamDecompressor<'a>,
}

impl<'a> DecompressingSink<'a> {
    pub fn new(inner: &'a mut (dyn StreamSink + Send), map: &'a EntityMap) -> Self {
        Self {
            inner,
            text: StreamDecompressor::new(map),
            reasoning: StreamDecompressor::new(map),
        }
    }

    /// Emit anything still held back.
    pub fn finish(mut self) {
        let reasoning = self.reasoning.finish();
        if !reasoning.is_empty() {
            self.inner.on_reasoning(&reasoning);
        }
        let text = self.text.finish();
        if !text.is_empty() {
            self.inner.on_text(&text);
        }
    }
}

impl StreamSink for DecompressingSink<'_> {
    fn on_text(&mut self, chunk: &str) {
        let ready = self.text.push(chunk);
        if !ready.is_empty() {
            self.inner.on_text(&ready);
        }
    }

    fn on_reasoning(&mut self, chunk: &str) {
        let ready = self.reasoning.push(chunk);
        if !ready.is_empty() {
            self.inner.on_reasoning(&ready);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ToolCall, ToolResult};
    use serde_json::json;

    const PATH: &str = "src/context/compression_engine.rs";

    #[derive(Default)]
    struct Collect(String);

    impl StreamSink for Collect {
        fn on_text(&mut self, chunk: &str) {
            self.0.push_str(chunk);
        }
    }

    fn config() -> CompressionConfig {
        CompressionConfig {
            enabled: true,
            ..Default::default()
        }
    }

    #[test]
    fn repeated_path_is_compressed() {
        let text = format!("{PATH} a {PATH} b {PATH} c {PATH} d {PATH}");
        let messages = vec![Message::user(text.clone())];
        let out = compress_messages(&messages, &config()).expect("compression applies");
        assert_eq!(out.map.entities().len(), 1);
        let entity = &out.map.entities()[0];
        assert_eq!(entity.value, PATH);
        assert_eq!(entity.occurrences, 5);
        assert!(entity.savings > 0);
        assert!(out.compressed_bytes < out.original_bytes);
        assert_eq!(out.messages[0].text(), "[E1] a [E1] b [E1] c [E1] d [E1]");
        assert_eq!(out.map.decompress(&out.messages[0].text()), text);
    }

    #[test]
    fn single_occurrence_is_skipped() {
        let messages = vec![Message::user(format!("only once: {PATH}"))];
        assert!(compress_messages(&messages, &config()).is_none());
    }

    #[test]
    fn unprofitable_entities_are_skipped() {
        // Two occurrences of a 16-byte value do not cover the legend line.
        let value = "abcdefghijklmnop";
        let messages = vec![Message::user(format!("{value} {value}"))];
        assert!(compress_messages(&messages, &config()).is_none());
    }

    #[test]
    fn existing_reference_text_disables_compression() {
        let messages = vec![Message::user(format!("{PATH} {PATH} {PATH} [E1]"))];
        assert!(compress_messages(&messages, &config()).is_none());
    }

    #[test]
    fn round_trip_across_messages_and_tool_results() {
        let call = ToolCall::new("t1", "read_file", json!({"path": PATH}));
        let messages = vec![
            Message::user(format!("Look at {PATH} and crate::context::compression_engine")),
            Message::assistant_blocks(vec![call.to_block()]),
            Message::tool_results(&[ToolResult::ok(
                "t1",
                format!("// {PATH}\nuse crate::context::compression_engine;\n// {PATH}"),
            )]),
            Message::assistant(format!("{PATH} uses crate::context::compression_engine")),
        ];
        let out = compress_messages(&messages, &config()).expect("compression applies");
        for (original, compressed) in messages.iter().zip(&out.messages) {
            assert_eq!(out.map.decompress(&compressed.text()), original.text());
        }
        // Tool inputs are left untouched.
        assert_eq!(out.messages[1], messages[1]);
    }

    #[test]
    fn legend_lists_every_entity() {
        let messages = vec![Message::user(format!("{PATH} {PATH} {PATH}"))];
        let out = compress_messages(&messages, &config()).unwrap();
        let legend = out.map.legend();
        assert!(legend.starts_with("## Entity References"));
        assert!(legend.contains(&format!("[E1] = {PATH}")));
    }

    #[test]
    fn decompresses_json_strings() {
        let messages = vec![Message::user(format!("{PATH} {PATH} {PATH}"))];
        let map = compress_messages(&messages, &config()).unwrap().map;
        let mut input = json!({"path": "[E1]", "nested": ["x [E1] y", 3], "other": "[E9]"});
        map.decompress_value(&mut input);
        assert_eq!(input["path"], PATH);
        assert_eq!(input["nested"][0], format!("x {PATH} y"));
        assert_eq!(input["other"], "[E9]");
    }

    #[test]
    fn stream_holds_split_references() {
        let messages = vec![Message::user(format!("{PATH} {PATH} {PATH}"))];
        let map = compress_messages(&messages, &config()).unwrap().map;
        let mut decompressor = StreamDecompressor::new(&map);
        assert_eq!(decompressor.push("edit ["), "edit ");
        assert_eq!(decompressor.push("E"), "");
        assert_eq!(decompressor.push("1] now"), format!("{PATH} now"));
        assert_eq!(decompressor.push(" [x]"), " [x]");
        assert_eq!(decompressor.push(" [E"), " ");
        assert_eq!(decompressor.finish(), "[E");
    }

    #[test]
    fn decompressing_sink_matches_whole_text() {
        let messages = vec![Message::user(format!("{PATH} {PATH} {PATH}"))];
        let map = compress_messages(&messages, &config()).unwrap().map;
        let compressed = "see [E1], then [E1] again [E";
        for split in 1..compressed.len() {
            let mut collect = Collect::default();
            let mut sink = DecompressingSink::new(&mut collect, &map);
            sink.on_text(&compressed[..split]);
            sink.on_text(&compressed[split..]);
            sink.finish();
            assert_eq!(collect.0, map.decompress(compressed), "split at {split}");
        }
    }
}

//! Tool abstraction and the default registry.
//!
//! A [`Tool`] exposes a static definition (name, description, JSON schema)
//! and an async `execute` over already-validated JSON input. Tools are
//! collected into a [`ToolSet`], which implements [`ToolRegistry`]: schema
//! validation at the boundary, timing, timeouts, truncation, and conversion
//! of every outcome into a [`ToolResult`].

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, info, trace};

use crate::tools::names;
use crate::{ToolCall, ToolDef, ToolResult};

/// Maximum size (in bytes) for tool output before truncation.
pub const DEFAULT_MAX_RESULT_BYTES: usize = 30_000;

/// Boxed future returned by [`Tool::execute`]. `Err` becomes an error result.
pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = Result<String, String>> + Send + 'a>>;

/// Boxed future returned by [`ToolRegistry::execute`].
pub type RegistryFuture<'a> = Pin<Box<dyn Future<Output = ToolResult> + Send + 'a>>;

// ── Tool trait ─────────────────────────────────────────────────────

/// A capability the model can invoke.
///
/// # Example
///
/// ```ignore
/// struct Echo;
///
/// impl Tool for Echo {
///     fn definition(&self) -> ToolDef { /* ... */ }
///
///     fn execute(&self, input: &Value) -> ToolFuture<'_> {
///         let text = input["text"].as_str().unwrap_or_default().to_string();
///         Box::pin(async move { Ok(text) })
///     }
/// }
/// ```
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDef;

    /// Run the tool. Failures are returned as `Err(message)` and reach the
    /// model as an error result; they never abort the loop.
    fn execute(&self, input: &Value) -> ToolFuture<'_>;

    fn name(&self) -> String {
        self.definition().function.name
    }

    /// Whether the tool has no side effects. Read-only calls on disjoint
    /// resources may run in parallel.
    fn is_read_only(&self) -> bool {
        false
    }
}

/// What the agent loop needs from a tool collection.
pub trait ToolRegistry: Send + Sync {
    fn definitions(&self) -> Vec<ToolDef>;

    /// Execute one call. Unknown tools and invalid input are error results.
    fn execute<'a>(&'a self, call: &'a ToolCall) -> RegistryFuture<'a>;

    fn is_read_only(&self, tool_name: &str) -> bool {
        names::is_read_only(tool_name)
    }
}

// ── ToolSet ────────────────────────────────────────────────────────

/// A collection of tools dispatched by name.
///
/// ```ignore
/// let tools = ToolSet::new()
///     .with_max_result_bytes(15_000)
///     .with_common_tools("/path/to/workdir")
///     .with_default_timeout(Some(Duration::from_secs(30)))
///     .with(MyCustomTool::new());
/// ```
pub struct ToolSet {
    tools: BTreeMap<String, Box<dyn Tool>>,
    max_result_bytes: usize,
    validate_args: bool,
    /// `None` disables timeouts.
    default_timeout: Option<Duration>,
}

impl fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolSet")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .field("max_result_bytes", &self.max_result_bytes)
            .field("validate_args", &self.validate_args)
            .finish()
    }
}

impl Default for ToolSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolSet {
    /// An empty set with schema validation on.
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
            max_result_bytes: DEFAULT_MAX_RESULT_BYTES,
            validate_args: true,
            default_timeout: None,
        }
    }

    pub fn with_max_result_bytes(mut self, max: usize) -> Self {
        self.max_result_bytes = max;
        self
    }

    pub fn with_arg_validation(mut self, enabled: bool) -> Self {
        self.validate_args = enabled;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Register a tool, replacing any existing tool with the same name.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name(), Box::new(tool));
    }

    pub fn with(mut self, tool: impl Tool + 'static) -> Self {
        self.register(tool);
        self
    }

    /// Register `tool` only when `condition` holds.
    pub fn with_if(self, condition: bool, tool: impl Tool + 'static) -> Self {
        if condition { self.with(tool) } else { self }
    }

    /// Register the built-in file and shell tools rooted at `workdir`.
    ///
    /// See [`common`](crate::tools::common) for the list.
    pub fn with_common_tools(self, workdir: impl Into<String>) -> Self {
        use crate::tools::common::{
            Bash, EditFile, Grep, InsertLine, ListFiles, ReadFile, WriteFile,
        };
        let workdir = workdir.into();
        self.with(ReadFile::new(workdir.clone()))
            .with(ListFiles::new(workdir.clone()))
            .with(Grep::new(workdir.clone()))
            .with(WriteFile::new(workdir.clone()))
            .with(EditFile::new(workdir.clone()))
            .with(InsertLine::new(workdir.clone()))
            .with(Bash::new(workdir))
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    async fn run(&self, call: &ToolCall) -> ToolResult {
        let name = call.name.as_str();
        let Some(tool) = self.tools.get(name) else {
            return ToolResult::error(&call.id, format!("Error: unknown tool '{name}'"));
        };

        if self.validate_args
            && let Some(error) = validate_tool_input(tool.as_ref(), &call.input)
        {
            return ToolResult::error(&call.id, error);
        }

        log_tool_call(name, &call.input);
        let start = Instant::now();

        let outcome = match self.default_timeout {
            Some(limit) => match tokio::time::timeout(limit, tool.execute(&call.input)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    info!("Tool {name} timed out after {:.0}s", limit.as_secs_f64());
                    Err(format!(
                        "Error: tool '{name}' timed out after {:.0} seconds",
                        limit.as_secs_f64()
                    ))
                }
            },
            None => tool.execute(&call.input).await,
        };

        let elapsed = start.elapsed();
        let (content, is_error) = match outcome {
            Ok(out) => (out, false),
            Err(err) => (err, true),
        };
        debug!(
            "Tool {name} completed in {:.0}ms ({} bytes, error={is_error})",
            elapsed.as_secs_f64() * 1000.0,
            content.len()
        );
        trace!(
            "Tool {name} result preview: {}",
            truncate_at_char_boundary(&content, 300)
        );

        let content = truncate_result(content, self.max_result_bytes);
        ToolResult {
            tool_use_id: call.id.clone(),
            content,
            is_error,
        }
    }
}

impl ToolRegistry for ToolSet {
    fn definitions(&self) -> Vec<ToolDef> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    fn execute<'a>(&'a self, call: &'a ToolCall) -> RegistryFuture<'a> {
        Box::pin(self.run(call))
    }

    fn is_read_only(&self, tool_name: &str) -> bool {
        self.tools
            .get(tool_name)
            .map_or_else(|| names::is_read_only(tool_name), |t| t.is_read_only())
    }
}

// ── FnTool ────────────────────────────────────────────────────────

type ErasedToolHandler = Box<
    dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<String, String>> + Send>> + Send + Sync,
>;

/// A closure-based tool that deserializes its typed arguments and delegates
/// to an async handler.
///
/// ```ignore
/// #[derive(Deserialize, JsonSchema)]
/// struct SearchArgs { query: String }
///
/// let tool = FnTool::new(
///     ToolDef::new("search", "Search the notes", json_schema_for::<SearchArgs>()),
///     |args: SearchArgs| async move { Ok(format!("no results for {}", args.query)) },
/// )
/// .read_only(true);
/// ```
pub struct FnTool {
    def: ToolDef,
    handler: ErasedToolHandler,
    read_only: bool,
}

impl FnTool {
    pub fn new<A, F, Fut>(def: ToolDef, handler: F) -> Self
    where
        A: serde::de::DeserializeOwned + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, String>> + Send + 'static,
    {
        let erased = move |raw: Value| -> Pin<Box<dyn Future<Output = Result<String, String>> + Send>> {
            match parse_tool_args::<A>(raw) {
                Ok(args) => Box::pin(handler(args)),
                Err(e) => Box::pin(async move { Err(e) }),
            }
        };
        Self {
            def,
            handler: Box::new(erased),
            read_only: false,
        }
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }
}

impl Tool for FnTool {
    fn definition(&self) -> ToolDef {
        self.def.clone()
    }

    fn execute(&self, input: &Value) -> ToolFuture<'_> {
        (self.handler)(input.clone())
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}

impl fmt::Debug for FnTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTool")
            .field("name", &self.def.function.name)
            .field("read_only", &self.read_only)
            .finish()
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// Validate `input` against the tool's declared JSON Schema.
///
/// `None` when valid (or when the schema itself cannot be compiled);
/// otherwise an error message the model can act on.
pub fn validate_tool_input(tool: &dyn Tool, input: &Value) -> Option<String> {
    let def = tool.definition();
    let validator = jsonschema::validator_for(&def.function.parameters).ok()?;

    let errors: Vec<String> = validator
        .iter_errors(input)
        .map(|e| format!("  - {}: {e}", e.instance_path()))
        .collect();

    if errors.is_empty() {
        None
    } else {
        Some(format!(
            "Error: argument validation failed for tool '{}':\n{}\n\
             Please fix the arguments and try again.",
            def.function.name,
            errors.join("\n")
        ))
    }
}

/// Deserialize tool input into its typed argument struct.
pub fn parse_tool_args<T: serde::de::DeserializeOwned>(input: Value) -> Result<T, String> {
    serde_json::from_value(input).map_err(|e| {
        format!(
            "Error: invalid tool arguments: {e}. \
             Please provide arguments matching the tool's parameter schema."
        )
    })
}

fn log_tool_call(name: &str, input: &Value) {
    let raw = input.to_string();
    let preview = truncate_at_char_boundary(&raw, 120);
    info!(
        "[tool] {name}({preview}{})",
        if raw.len() > preview.len() { "..." } else { "" }
    );
    trace!("[tool] {name} arguments: {raw}");
}

/// Longest prefix of `s` that fits in `max_bytes` without splitting a char.
pub fn truncate_at_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s.get(..end).unwrap_or_default()
}

/// Truncate to at most `max` bytes, appending a notice if trimmed.
pub fn truncate_result(s: String, max: usize) -> String {
    if s.len() > max {
        format!(
            "{}...\n[truncated: {} bytes total]",
            truncate_at_char_boundary(&s, max),
            s.len()
        )
    } else {
        s
    }
}

//! Built-in file and shell tools for coding agents.
//!
//! Every tool is rooted at a `workdir`; relative paths resolve against it
//! and `..` segments are rejected.
//!
//! | Tool | Name | Class |
//! |------|------|-------|
//! | [`ReadFile`] | `read_file` | read-only |
//! | [`ListFiles`] | `list_files` | read-only |
//! | [`Grep`] | `grep` | read-only |
//! | [`WriteFile`] | `write_file` | file-mutating |
//! | [`EditFile`] | `edit_file` | file-mutating |
//! | [`InsertLine`] | `insert_line` | file-mutating |
//! | [`Bash`] | `bash` | process side effects |

use std::path::{Path, PathBuf};
use std::time::Duration;

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use tokio::fs;
use tokio::process::Command;

use crate::ToolDef;
use crate::approval::diff::insert_at_line;
use crate::tools::core::{Tool, ToolFuture, parse_tool_args};
use crate::tools::names;
use crate::tools::spec::ToolSpec;

/// Default maximum grep matches per file.
pub const DEFAULT_MAX_GREP_MATCHES: u32 = 200;

/// Default wall-clock limit for one bash command.
pub const DEFAULT_BASH_TIMEOUT_SECS: u64 = 120;

// ── Typed argument structs ──────────────────────────────────────────

#[derive(Deserialize, JsonSchema)]
pub struct ReadFileArgs {
    /// File path relative to the project root (e.g. 'src/main.rs').
    pub path: String,
    /// First line to return, 1-based (default 1).
    #[serde(default)]
    pub offset: Option<usize>,
    /// Maximum number of lines to return (default: all).
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Deserialize, JsonSchema)]
pub struct ListFilesArgs {
    /// Directory path relative to the project root (default '.').
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Deserialize, JsonSchema)]
pub struct GrepArgs {
    /// Regex pattern to search for.
    pub pattern: String,
    /// Directory or file to search in (relative to the project root, default '.').
    #[serde(default)]
    pub path: Option<String>,
    /// File glob filter (e.g. '*.rs').
    #[serde(default)]
    pub glob: Option<String>,
    /// Case-insensitive search (default false).
    #[serde(default)]
    pub case_insensitive: Option<bool>,
}

#[derive(Deserialize, JsonSchema)]
pub struct WriteFileArgs {
    /// File path relative to the project root.
    pub path: String,
    /// Full new content of the file.
    pub content: String,
}

#[derive(Deserialize, JsonSchema)]
pub struct EditFileArgs {
    /// File path relative to the project root.
    pub path: String,
    /// Exact text to replace. Must occur in the file.
    pub old_string: String,
    /// Replacement text.
    pub new_string: String,
    /// Replace every occurrence instead of requiring a unique match.
    #[serde(default)]
    pub replace_all: bool,
}

#[derive(Deserialize, JsonSchema)]
pub struct InsertLineArgs {
    /// File path relative to the project root.
    pub path: String,
    /// 1-based line number to insert before. Past the end appends.
    pub line: usize,
    /// Text to insert (may span several lines).
    pub content: String,
}

#[derive(Deserialize, JsonSchema)]
pub struct BashArgs {
    /// Shell command to run in the project root.
    pub command: String,
    /// Timeout in seconds (default 120).
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

// ── Shared helpers ──────────────────────────────────────────────────

/// Resolve `path` under `workdir`, rejecting `..` segments.
fn resolve(workdir: &str, path: &str) -> Result<PathBuf, String> {
    if Path::new(path)
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return Err("Error: path traversal not allowed".to_string());
    }
    Ok(Path::new(workdir).join(path))
}

fn format_output(output: std::process::Output, lenient_exit_codes: &[i32]) -> Result<String, String> {
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    let ok = output.status.success()
        || output
            .status
            .code()
            .is_some_and(|c| lenient_exit_codes.contains(&c));
    if ok {
        if stderr.is_empty() {
            Ok(stdout)
        } else {
            Ok(format!("{stdout}\n[stderr]\n{stderr}"))
        }
    } else {
        Err(format!("Command failed ({}):\n{stdout}\n{stderr}", output.status))
    }
}

// ── ReadFile ────────────────────────────────────────────────────────

pub struct ReadFile {
    workdir: String,
}

impl ReadFile {
    pub fn new(workdir: impl Into<String>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }
}

impl Tool for ReadFile {
    fn definition(&self) -> ToolDef {
        ToolSpec::builder(names::READ_FILE)
            .purpose("Read a file from the project")
            .when_to_use("When you need the contents of a file whose path you know")
            .when_not_to_use(
                "When searching for a pattern across many files, use grep. \
                 When listing a directory, use list_files",
            )
            .parameters_for::<ReadFileArgs>()
            .example(
                "read_file(path='src/lib.rs', offset=40, limit=20)",
                "Returns lines 40-59 of the file",
            )
            .output_format("Raw file content as text")
            .to_tool_def()
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn execute(&self, input: &Value) -> ToolFuture<'_> {
        let input = input.clone();
        Box::pin(async move {
            let args: ReadFileArgs = parse_tool_args(input)?;
            let full_path = resolve(&self.workdir, &args.path)?;

            if let Ok(meta) = fs::metadata(&full_path).await
                && meta.is_dir()
            {
                return Err(format!(
                    "Error: '{}' is a directory, not a file. Use list_files to browse directories.",
                    args.path
                ));
            }

            let content = fs::read_to_string(&full_path)
                .await
                .map_err(|e| format!("Error reading '{}': {e}", args.path))?;

            if args.offset.is_none() && args.limit.is_none() {
                return Ok(content);
            }
            let start = args.offset.unwrap_or(1).saturating_sub(1);
            let lines = content.lines().skip(start);
            let selected: Vec<&str> = match args.limit {
                Some(limit) => lines.take(limit).collect(),
                None => lines.collect(),
            };
            Ok(selected.join("\n"))
        })
    }
}

// ── ListFiles ───────────────────────────────────────────────────────

pub struct ListFiles {
    workdir: String,
}

impl ListFiles {
    pub fn new(workdir: impl Into<String>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }
}

impl Tool for ListFiles {
    fn definition(&self) -> ToolDef {
        ToolSpec::builder(names::LIST_FILES)
            .purpose("List the entries of a directory")
            .when_to_use("When you need to discover what exists in a directory")
            .when_not_to_use("When you already know the file path, use read_file")
            .parameters_for::<ListFilesArgs>()
            .example("list_files(path='src')", "One entry per line, directories end with '/'")
            .output_format("Sorted entries, one per line. Directories end with '/'.")
            .to_tool_def()
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn execute(&self, input: &Value) -> ToolFuture<'_> {
        let input = input.clone();
        Box::pin(async move {
            let args: ListFilesArgs = parse_tool_args(input)?;
            let rel = args.path.as_deref().unwrap_or(".");
            let full_path = resolve(&self.workdir, rel)?;

            let mut dir = fs::read_dir(&full_path)
                .await
                .map_err(|e| format!("Error listing '{rel}': {e}"))?;
            let mut entries = Vec::new();
            while let Some(entry) = dir
                .next_entry()
                .await
                .map_err(|e| format!("Error listing '{rel}': {e}"))?
            {
                let mut name = entry.file_name().to_string_lossy().into_owned();
                if entry.file_type().await.is_ok_and(|t| t.is_dir()) {
                    name.push('/');
                }
                entries.push(name);
            }
            entries.sort();
            if entries.is_empty() {
                Ok(format!("'{rel}' is empty"))
            } else {
                Ok(entries.join("\n"))
            }
        })
    }
}

// ── Grep ────────────────────────────────────────────────────────────

pub struct Grep {
    workdir: String,
    max_matches: u32,
}

impl Grep {
    pub fn new(workdir: impl Into<String>) -> Self {
        Self {
            workdir: workdir.into(),
            max_matches: DEFAULT_MAX_GREP_MATCHES,
        }
    }

    pub fn max_matches(mut self, max: u32) -> Self {
        self.max_matches = max;
        self
    }
}

impl Tool for Grep {
    fn definition(&self) -> ToolDef {
        ToolSpec::builder(names::GREP)
            .purpose("Search file contents for a regex pattern")
            .when_to_use("When you need to find text matching a pattern across files")
            .when_not_to_use("When you already know the file path, use read_file")
            .parameters_for::<GrepArgs>()
            .example(
                "grep(pattern='fn main', glob='*.rs')",
                "Matching lines prefixed with file:line_number",
            )
            .output_format("Matching lines prefixed with file_path:line_number:")
            .disambiguate(
                "Need the whole file you already located",
                names::READ_FILE,
                "read_file returns full content; grep returns matching lines",
            )
            .to_tool_def()
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn execute(&self, input: &Value) -> ToolFuture<'_> {
        let input = input.clone();
        Box::pin(async move {
            let args: GrepArgs = parse_tool_args(input)?;
            let rel = args.path.as_deref().unwrap_or(".");
            // Resolve for the traversal check; grep itself runs in workdir.
            resolve(&self.workdir, rel)?;

            let mut cmd = Command::new("grep");
            cmd.current_dir(&self.workdir)
                .arg("-rn")
                .arg("--color=never")
                .arg(format!("--max-count={}", self.max_matches));
            if args.case_insensitive.unwrap_or(false) {
                cmd.arg("-i");
            }
            if let Some(glob) = &args.glob {
                cmd.arg(format!("--include={glob}"));
            }
            cmd.arg("-e").arg(&args.pattern).arg(rel);

            let output = cmd
                .output()
                .await
                .map_err(|e| format!("Error running grep: {e}"))?;
            // Exit code 1 means "no matches".
            let out = format_output(output, &[1])?;
            if out.trim().is_empty() {
                Ok(format!("No matches for '{}'", args.pattern))
            } else {
                Ok(out)
            }
        })
    }
}

// ── WriteFile ───────────────────────────────────────────────────────

pub struct WriteFile {
    workdir: String,
}

impl WriteFile {
    pub fn new(workdir: impl Into<String>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }
}

impl Tool for WriteFile {
    fn definition(&self) -> ToolDef {
        ToolSpec::builder(names::WRITE_FILE)
            .purpose("Create or overwrite a file with the given content")
            .when_to_use("When creating a new file or replacing a file wholesale")
            .when_not_to_use("When changing a few lines of an existing file, use edit_file")
            .parameters_for::<WriteFileArgs>()
            .output_format("Confirmation with the number of bytes written")
            .to_tool_def()
    }

    fn execute(&self, input: &Value) -> ToolFuture<'_> {
        let input = input.clone();
        Box::pin(async move {
            let args: WriteFileArgs = parse_tool_args(input)?;
            let full_path = resolve(&self.workdir, &args.path)?;
            if let Some(parent) = full_path.parent() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| format!("Error creating directories for '{}': {e}", args.path))?;
            }
            fs::write(&full_path, &args.content)
                .await
                .map_err(|e| format!("Error writing '{}': {e}", args.path))?;
            Ok(format!("Wrote {} bytes to {}", args.content.len(), args.path))
        })
    }
}

// ── EditFile ────────────────────────────────────────────────────────

pub struct EditFile {
    workdir: String,
}

impl EditFile {
    pub fn new(workdir: impl Into<String>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }
}

impl Tool for EditFile {
    fn definition(&self) -> ToolDef {
        ToolSpec::builder(names::EDIT_FILE)
            .purpose("Replace exact text in an existing file")
            .when_to_use("When changing part of a file you have already read")
            .when_not_to_use("When creating a file or rewriting it entirely, use write_file")
            .parameters_for::<EditFileArgs>()
            .example(
                "edit_file(path='src/lib.rs', old_string='fn old()', new_string='fn new()')",
                "Replaces the single occurrence of old_string",
            )
            .output_format("Confirmation with the number of replacements")
            .to_tool_def()
    }

    fn execute(&self, input: &Value) -> ToolFuture<'_> {
        let input = input.clone();
        Box::pin(async move {
            let args: EditFileArgs = parse_tool_args(input)?;
            if args.old_string.is_empty() {
                return Err("Error: old_string must not be empty".to_string());
            }
            if args.old_string == args.new_string {
                return Err("Error: old_string and new_string are identical".to_string());
            }
            let full_path = resolve(&self.workdir, &args.path)?;
            let current = fs::read_to_string(&full_path)
                .await
                .map_err(|e| format!("Error reading '{}': {e}", args.path))?;

            let count = current.matches(args.old_string.as_str()).count();
            let updated = match (count, args.replace_all) {
                (0, _) => {
                    return Err(format!("Error: old_string not found in '{}'", args.path));
                }
                (1, _) | (_, true) => current.replace(&args.old_string, &args.new_string),
                (n, false) => {
                    return Err(format!(
                        "Error: old_string occurs {n} times in '{}'. \
                         Add surrounding context or set replace_all.",
                        args.path
                    ));
                }
            };
            fs::write(&full_path, updated)
                .await
                .map_err(|e| format!("Error writing '{}': {e}", args.path))?;
            Ok(format!("Replaced {count} occurrence(s) in {}", args.path))
        })
    }
}

// ── InsertLine ──────────────────────────────────────────────────────

pub struct InsertLine {
    workdir: String,
}

impl InsertLine {
    pub fn new(workdir: impl Into<String>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }
}

impl Tool for InsertLine {
    fn definition(&self) -> ToolDef {
        ToolSpec::builder(names::INSERT_LINE)
            .purpose("Insert text before a given line of a file")
            .when_to_use("When adding lines at a known position without replacing anything")
            .when_not_to_use("When replacing existing text, use edit_file")
            .parameters_for::<InsertLineArgs>()
            .to_tool_def()
    }

    fn execute(&self, input: &Value) -> ToolFuture<'_> {
        let input = input.clone();
        Box::pin(async move {
            let args: InsertLineArgs = parse_tool_args(input)?;
            if args.line == 0 {
                return Err("Error: line numbers start at 1".to_string());
            }
            let full_path = resolve(&self.workdir, &args.path)?;
            let current = match fs::read_to_string(&full_path).await {
                Ok(c) => c,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
                Err(e) => return Err(format!("Error reading '{}': {e}", args.path)),
            };
            let updated = insert_at_line(&current, args.line, &args.content);
            fs::write(&full_path, updated)
                .await
                .map_err(|e| format!("Error writing '{}': {e}", args.path))?;
            Ok(format!("Inserted text at line {} of {}", args.line, args.path))
        })
    }
}

// ── Bash ────────────────────────────────────────────────────────────

pub struct Bash {
    workdir: String,
    default_timeout: Duration,
}

impl Bash {
    pub fn new(workdir: impl Into<String>) -> Self {
        Self {
            workdir: workdir.into(),
            default_timeout: Duration::from_secs(DEFAULT_BASH_TIMEOUT_SECS),
        }
    }

    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }
}

impl Tool for Bash {
    fn definition(&self) -> ToolDef {
        ToolSpec::builder(names::BASH)
            .purpose("Run a shell command in the project root and return its output")
            .when_to_use("Builds, tests, git commands and anything no dedicated tool covers")
            .when_not_to_use(
                "When a dedicated tool exists: read_file to read, grep to search, \
                 edit_file to change files",
            )
            .parameters_for::<BashArgs>()
            .example("bash(command='cargo test')", "Test output")
            .output_format("Command stdout, plus stderr under a [stderr] marker when present")
            .to_tool_def()
    }

    fn execute(&self, input: &Value) -> ToolFuture<'_> {
        let input = input.clone();
        Box::pin(async move {
            let args: BashArgs = parse_tool_args(input)?;
            let limit = args
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(self.default_timeout);
            let child = Command::new("sh")
                .arg("-c")
                .arg(&args.command)
                .current_dir(&self.workdir)
                .kill_on_drop(true)
                .output();
            match tokio::time::timeout(limit, child).await {
                Ok(Ok(output)) => format_output(output, &[]),
                Ok(Err(e)) => Err(format!("Error running command: {e}")),
                Err(_) => Err(format!(
                    "Error: command timed out after {} seconds",
                    limit.as_secs()
                )),
            }
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────────

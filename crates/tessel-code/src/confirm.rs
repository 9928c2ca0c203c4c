//! Interactive tool-call confirmation on the terminal.
//!
//! | Answer | Result |
//! |--------|--------|
//! | `y` | approve once |
//! | `n` / empty | deny |
//! | `a` | abort the turn |
//! | `p [pattern]` | approve and remember a pattern (default: first suggestion) |
//! | `c [id]` | approve and remember a category (default: first suggestion) |

use std::io::{IsTerminal, Write};
use std::sync::Arc;

use tessel::approval::{ConfirmFuture, ConfirmationHandler, ConfirmationRequest, ConfirmationResult};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;
use tracing::warn;

/// Line reader over stdin shared by the prompt loop and the confirmer, so
/// typed-ahead input is never split between two buffers.
#[derive(Clone)]
pub struct StdinLines(Arc<Mutex<Lines<BufReader<Stdin>>>>);

impl StdinLines {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(BufReader::new(tokio::io::stdin()).lines())))
    }

    /// Next line without its newline, or `None` at end of input.
    pub async fn next_line(&self) -> Option<String> {
        match self.0.lock().await.next_line().await {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to read stdin: {e}");
                None
            }
        }
    }
}

impl Default for StdinLines {
    fn default() -> Self {
        Self::new()
    }
}

pub struct StdinConfirmer {
    input: StdinLines,
}

impl StdinConfirmer {
    pub fn new(input: StdinLines) -> Self {
        Self { input }
    }
}

impl ConfirmationHandler for StdinConfirmer {
    fn confirm<'a>(&'a self, request: &'a ConfirmationRequest) -> ConfirmFuture<'a> {
        Box::pin(async move {
            if !std::io::stdin().is_terminal() {
                warn!(tool = %request.call.name, "stdin is not a terminal; denying tool call");
                return ConfirmationResult::Deny;
            }
            let mut stderr = std::io::stderr();
            let _ = write!(stderr, "{}", render_request(request));
            loop {
                let _ = write!(stderr, "{}", prompt_line(request));
                let _ = stderr.flush();
                let Some(line) = self.input.next_line().await else {
                    return ConfirmationResult::Deny;
                };
                match parse_answer(&line, request) {
                    Some(answer) => return answer,
                    None => {
                        let _ = writeln!(stderr, "Unrecognized answer: {}", line.trim());
                    }
                }
            }
        })
    }
}

/// Multi-line description of the call: input, danger, diff, suggestions.
pub fn render_request(request: &ConfirmationRequest) -> String {
    let call = &request.call;
    let mut out = format!("\n── Approve {} ──\n", call.name);
    match call.input_str("command") {
        Some(command) => out.push_str(&format!("  $ {command}\n")),
        None => out.push_str(&format!("  {}\n", call.input)),
    }
    if let Some(reason) = &request.danger {
        out.push_str(&format!("  ! dangerous: {reason}\n"));
    }
    if let Some(diff) = &request.diff {
        out.push('\n');
        out.push_str(diff);
        if !diff.ends_with('\n') {
            out.push('\n');
        }
    }
    if !request.suggested_patterns.is_empty() {
        out.push_str(&format!(
            "  patterns: {}\n",
            request.suggested_patterns.join(", ")
        ));
    }
    if !request.suggested_categories.is_empty() {
        let categories: Vec<String> = request
            .suggested_categories
            .iter()
            .map(|c| format!("{} ({})", c.id, c.name))
            .collect();
        out.push_str(&format!("  categories: {}\n", categories.join(", ")));
    }
    out
}

fn prompt_line(request: &ConfirmationRequest) -> String {
    let mut choices = String::from("[y]es / [n]o / [a]bort");
    if !request.suggested_patterns.is_empty() {
        choices.push_str(" / [p]attern");
    }
    if !request.suggested_categories.is_empty() {
        choices.push_str(" / [c]ategory");
    }
    format!("{choices}: ")
}

/// Interpret one typed answer. `None` when it means nothing.
pub fn parse_answer(input: &str, request: &ConfirmationRequest) -> Option<ConfirmationResult> {
    let input = input.trim();
    let (word, rest) = match input.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (input, ""),
    };
    match word.to_ascii_lowercase().as_str() {
        "y" | "yes" => Some(ConfirmationResult::Approve),
        "" | "n" | "no" => Some(ConfirmationResult::Deny),
        "a" | "abort" => Some(ConfirmationResult::Abort),
        "p" | "pattern" if !rest.is_empty() => {
            Some(ConfirmationResult::ApprovePattern(rest.to_string()))
        }
        "p" | "pattern" => request
            .suggested_patterns
            .first()
            .map(|p| ConfirmationResult::ApprovePattern(p.clone())),
        "c" | "category" if !rest.is_empty() => request
            .suggested_categories
            .iter()
            .find(|c| c.id == rest)
            .map(|c| ConfirmationResult::ApproveCategory(c.id.to_string())),
        "c" | "category" => request
            .suggested_categories
            .first()
            .map(|c| ConfirmationResult::ApproveCategory(c.id.to_string())),
        _ => None,
    }
}

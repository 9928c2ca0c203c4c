//! Terminal rendering of agent events.
//!
//! Response text streams to stdout; tool activity goes to stderr so piping
//! the answer stays clean.

use std::io::Write;
use std::sync::Mutex;

use tessel::agent::{AgentEvent, EventHandler, StopReason};

#[derive(Default)]
pub struct ConsoleHandler {
    /// Whether the last stdout write ended mid-line.
    mid_line: Mutex<bool>,
}

impl ConsoleHandler {
    fn end_line(&self) {
        let mut mid_line = self.mid_line.lock().unwrap_or_else(|e| e.into_inner());
        if *mid_line {
            println!();
            *mid_line = false;
        }
    }
}

impl EventHandler for ConsoleHandler {
    fn on_event(&self, event: &AgentEvent<'_>) {
        match event {
            AgentEvent::TextDelta(text) => {
                let mut stdout = std::io::stdout();
                let _ = write!(stdout, "{text}");
                let _ = stdout.flush();
                *self.mid_line.lock().unwrap_or_else(|e| e.into_inner()) = !text.ends_with('\n');
            }
            AgentEvent::ToolStart { call } => {
                self.end_line();
                eprintln!("{}", tool_line(&call.name, call.input_str("command")));
            }
            AgentEvent::ToolEnd {
                call,
                result,
                duration,
            } => {
                let mark = if result.is_error { "✗" } else { "✓" };
                eprintln!("  {mark} {} ({} ms)", call.name, duration.as_millis());
            }
            AgentEvent::ToolDenied { call } => {
                self.end_line();
                eprintln!("  ✗ {} denied", call.name);
            }
            AgentEvent::Compacted { report } => {
                self.end_line();
                eprintln!(
                    "[context compacted: ~{} -> ~{} tokens]",
                    report.tokens_before, report.tokens_after
                );
            }
            AgentEvent::Finished { reason } => {
                self.end_line();
                if *reason != StopReason::Completed {
                    eprintln!("[stopped: {reason:?}]");
                }
            }
            _ => {}
        }
    }
}

fn tool_line(name: &str, command: Option<&str>) -> String {
    match command {
        Some(command) => format!("→ {name}: {command}"),
        None => format!("→ {name}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_line_shows_commands() {
        assert_eq!(tool_line("bash", Some("ls -la")), "→ bash: ls -la");
        assert_eq!(tool_line("read_file", None), "→ read_file");
    }

    #[test]
    fn text_deltas_track_line_state() {
        let handler = ConsoleHandler::default();
        handler.on_event(&AgentEvent::TextDelta("partial"));
        assert!(*handler.mid_line.lock().unwrap());
        handler.on_event(&AgentEvent::TextDelta("done\n"));
        assert!(!*handler.mid_line.lock().unwrap());
    }
}

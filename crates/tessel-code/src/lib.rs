//! Terminal coding agent built on `tessel`.
//!
//! The pieces the `tessel-code` binary wires together, usable on their own:
//!
//! ```ignore
//! use tessel_code::{CodeConfig, StdinConfirmer, StdinLines};
//!
//! let config = CodeConfig::load(&workdir)?;
//! let tools = config.build_tool_set(&workdir);
//! let gate = ApprovalGate::new()
//!     .with_store(config.approval_store(&workdir))
//!     .with_handler(Arc::new(StdinConfirmer::new(StdinLines::new())));
//! ```
//!
//! # Binary
//!
//! ```sh
//! # One-shot
//! tessel-code --prompt "Add error handling to src/main.rs"
//!
//! # Interactive: one prompt per line, /clear to reset, /exit to quit
//! tessel-code --workdir /path/to/project
//! ```

pub mod config;
pub mod confirm;
pub mod console;
pub mod prompt;

pub use config::CodeConfig;
pub use confirm::{StdinConfirmer, StdinLines};
pub use console::ConsoleHandler;
pub use prompt::coding_system_prompt;

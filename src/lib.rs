//! termish - an interactive command shell engine
//!
//! # Overview
//!
//! termish reads command lines, expands them and runs them as single
//! commands, pipelines or control-flow blocks.
//!
//! ```text
//! # Batches and short-circuit operators
//! make && echo built || echo failed
//!
//! # Built-in pipelines run on threads joined by in-memory bridges
//! cat notes.txt | grep todo | sort -u
//!
//! # |> trims every line before the next stage sees it
//! cat padded.txt |> wc -l
//!
//! # Blocks are collected until `end` (or `}`)
//! for f in *.rs
//!     wc -l $f
//! end
//! ```
//!
//! # Example
//!
//! ```rust
//! use termish::Shell;
//!
//! let mut shell = Shell::new();
//! shell.interpret("greeting=hello");
//! assert_eq!(shell.context().vars.get("greeting").as_deref(), Some("hello"));
//! ```

pub mod arith;
pub mod bridge;
pub mod builtins;
pub mod config;
pub mod control;
pub mod error;
pub mod expand;
pub mod input;
pub mod jobs;
pub mod logging;
pub mod parser;
pub mod pipeline;
pub mod process;
pub mod security;
pub mod shell;
pub mod signals;
pub mod store;

// Re-export commonly used items
pub use bridge::{BridgeReader, BridgeWriter, CircularBuffer, StreamBridge};
pub use builtins::{BuiltinIo, Builtins, CoreBuiltins};
pub use config::{Config, ConfigError};
pub use control::{Block, BlockKind, ShellState};
pub use error::ShellError;
pub use input::{InputSource, NoInput, ScriptInput};
pub use jobs::{JobInfo, JobManager, JobStatus, SystemJobManager};
pub use pipeline::{PipelineExecutor, Streams};
pub use process::{ProcessManager, SystemProcessManager};
pub use shell::Shell;
pub use store::{AliasStore, EnvStore, FunctionStore, ShellContext, VariableStore};

//! # permwatch
//!
//! Command-line front end for the dangerous-permission registry.
//!
//! ```text
//! permwatch --inventory ./device scan
//! permwatch --inventory ./device ignore CAMERA --app com.example.a
//! permwatch --inventory ./device watch --interval 1800
//! ```
//!
//! The inventory directory holds `permissions.json` (protection level per
//! permission) and `apps/<package>.json` (one manifest per installed app).
//! Ignore rules persist in `<config>/permwatch/ignores.json` unless `--store`
//! says otherwise.

pub mod cli;
pub mod output;
pub mod tracing_support;

pub use cli::{execute, Cli, Command, Context, GlobalArgs};
pub use output::OutputFormat;
pub use tracing_support::{init_subscriber, init_subscriber_with_config, TracingConfig, TracingFormat};

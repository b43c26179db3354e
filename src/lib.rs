// dtsflow — Declarative workflow engine for SSIS package analysis
// License: Apache-2.0

pub mod config;
pub mod expression;
pub mod logger;
pub mod tool;
pub mod workflow;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

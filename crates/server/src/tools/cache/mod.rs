//! Cache-related MCP tools.

pub mod clear;
pub mod stats;

pub use clear::clear_impl;
pub use stats::stats_impl;

//! Core types and shared functionality for linkscope.
//!
//! This crate provides:
//! - Result and screenshot caches, with a SQLite persistence tier
//! - Unified error types
//! - Markdown, JSON and text exports of analyses
//! - Layered, versioned configuration

pub mod analysis;
pub mod cache;
pub mod config;
pub mod error;
pub mod export;

pub use analysis::AnalysisResult;
pub use cache::{CacheDb, CacheStats, ResultCache, ScreenshotStore};
pub use config::{AppConfig, ConfigError, ContentMode};
pub use error::{Error, ErrorKind};
pub use export::ExportFormat;

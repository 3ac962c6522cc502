//! Client code for linkscope.
//!
//! This crate provides URL detection and normalization, the HTTP fetch
//! pipeline, content extraction, screenshot capture, summarization, and the
//! analysis pipeline that ties them to the caches in `linkscope-core`.

pub mod extract;
pub mod fetch;
pub mod pipeline;
pub mod render;
pub mod summarize;

pub use extract::{
    ExtractedContent, Link, SpecificContent, SpecificKind, extract, extract_links, extract_specific,
};
pub use fetch::{DomainPolicy, FetchClient, FetchConfig, FetchResponse, PageFetcher, RetryPolicy};
pub use pipeline::{AnalysisOutcome, AnalysisPipeline, Failure, PipelineOptions, Stage};
pub use render::{CaptureOptions, Capturer, RenderError};
pub use summarize::{LlmSummarizer, Summarizer};

//! Exporting cached analyses as Markdown, JSON or plain text documents.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::Error;
use crate::analysis::AnalysisResult;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExportFormat {
    #[default]
    Markdown,
    Json,
    Text,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Markdown => "md",
            ExportFormat::Json => "json",
            ExportFormat::Text => "txt",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "md" | "markdown" => Ok(ExportFormat::Markdown),
            "json" => Ok(ExportFormat::Json),
            "txt" | "text" => Ok(ExportFormat::Text),
            other => Err(Error::InvalidInput(format!(
                "unsupported export format '{other}' (use md, json or txt)"
            ))),
        }
    }
}

#[derive(Serialize)]
struct JsonExport<'a> {
    exported_at: String,
    total_results: usize,
    results: &'a [AnalysisResult],
}

/// Render `results` as one document.
pub fn render(
    results: &[AnalysisResult],
    format: ExportFormat,
    exported_at: DateTime<Utc>,
) -> Result<String, Error> {
    let stamp = exported_at.format("%Y-%m-%d %H:%M:%S UTC");
    let doc = match format {
        ExportFormat::Markdown => {
            let mut doc = format!("# Link analysis export\n\nExported: {stamp}\n\n");
            doc.push_str(&format!("{} results\n\n---\n\n", results.len()));
            for (i, result) in results.iter().enumerate() {
                doc.push_str(&format!("## {}. {}\n\n", i + 1, result.url));
                if let Some(title) = &result.title {
                    doc.push_str(&format!("**{title}**\n\n"));
                }
                doc.push_str(&result.text);
                doc.push_str("\n\n---\n\n");
            }
            doc
        }
        ExportFormat::Json => {
            let export = JsonExport {
                exported_at: exported_at.to_rfc3339(),
                total_results: results.len(),
                results,
            };
            serde_json::to_string_pretty(&export)
                .map_err(|e| Error::InvalidInput(format!("export encoding: {e}")))?
        }
        ExportFormat::Text => {
            let rule = "=".repeat(50);
            let mut doc = format!("Link analysis export\nExported: {stamp}\n");
            doc.push_str(&format!("{} results\n{rule}\n\n", results.len()));
            for (i, result) in results.iter().enumerate() {
                doc.push_str(&format!("{}. {}\n{}\n", i + 1, result.url, "-".repeat(30)));
                if let Some(title) = &result.title {
                    doc.push_str(title);
                    doc.push('\n');
                }
                doc.push_str(&result.text);
                doc.push_str(&format!("\n\n{rule}\n\n"));
            }
            doc
        }
    };
    Ok(doc)
}

/// `linkscope_<host>_<unix>.<ext>` for a single result, `linkscope_all_<unix>.<ext>` otherwise.
pub fn file_name(
    results: &[AnalysisResult],
    format: ExportFormat,
    exported_at: DateTime<Utc>,
) -> String {
    let scope = match results {
        [only] => url::Url::parse(&only.url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.replace('.', "_")))
            .unwrap_or_else(|| "page".to_string()),
        _ => "all".to_string(),
    };
    format!("linkscope_{scope}_{}.{}", exported_at.timestamp(), format.extension())
}

/// Render `results` into a new file under `dir`, creating the directory if needed.
pub async fn write(
    results: &[AnalysisResult],
    format: ExportFormat,
    dir: &Path,
) -> Result<PathBuf, Error> {
    let now = Utc::now();
    let doc = render(results, format, now)?;

    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| Error::CacheWrite(format!("{}: {e}", dir.display())))?;
    let path = dir.join(file_name(results, format, now));
    tokio::fs::write(&path, doc)
        .await
        .map_err(|e| Error::CacheWrite(format!("{}: {e}", path.display())))?;

    tracing::info!(path = %path.display(), count = results.len(), %format, "Exported analyses");
    Ok(path)
}

//! Chat command table and dispatcher.
//!
//! Commands are `/name [args]`; names and aliases match case-insensitively.
//! Messages without a leading `/` are scanned for URLs when `auto_analyze`
//! is on.

use std::fmt;
use std::sync::Arc;

use linkscope_client::fetch::extract_urls;
use linkscope_client::pipeline::AnalysisOutcome;
use linkscope_core::{ContentMode, ExportFormat, export};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::app::App;
use crate::error::CommandError;
use crate::present::{Presentation, present};

/// Caller privilege, ordered from least to most.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => f.write_str("user"),
            Role::Admin => f.write_str("admin"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Analyze,
    Screenshot,
    CacheStats,
    CacheClear,
    Export,
    Mode,
    Config,
    Help,
}

/// One row of the command table.
#[derive(Debug)]
pub struct Command {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    /// Subcommand word, for rows sharing a name.
    pub sub: Option<&'static str>,
    pub kind: CommandKind,
    pub required_role: Role,
    pub usage: &'static str,
    pub summary: &'static str,
}

pub static COMMANDS: &[Command] = &[
    Command {
        name: "analyze",
        aliases: &["web", "summarize"],
        sub: None,
        kind: CommandKind::Analyze,
        required_role: Role::User,
        usage: "/analyze <url> [url...]",
        summary: "Fetch and summarize the given links",
    },
    Command {
        name: "screenshot",
        aliases: &["shot"],
        sub: None,
        kind: CommandKind::Screenshot,
        required_role: Role::User,
        usage: "/screenshot <url> [url...]",
        summary: "Capture screenshots of the given links",
    },
    Command {
        name: "cache",
        aliases: &[],
        sub: None,
        kind: CommandKind::CacheStats,
        required_role: Role::User,
        usage: "/cache [stats|clear]",
        summary: "Show cache statistics",
    },
    Command {
        name: "cache",
        aliases: &[],
        sub: Some("stats"),
        kind: CommandKind::CacheStats,
        required_role: Role::User,
        usage: "/cache stats",
        summary: "Show cache statistics",
    },
    Command {
        name: "cache",
        aliases: &[],
        sub: Some("clear"),
        kind: CommandKind::CacheClear,
        required_role: Role::Admin,
        usage: "/cache clear",
        summary: "Empty every cache tier",
    },
    Command {
        name: "export",
        aliases: &["save"],
        sub: None,
        kind: CommandKind::Export,
        required_role: Role::User,
        usage: "/export <url|all> [md|json|txt]",
        summary: "Write analyses to a Markdown, JSON or text file",
    },
    Command {
        name: "mode",
        aliases: &[],
        sub: None,
        kind: CommandKind::Mode,
        required_role: Role::Admin,
        usage: "/mode [both|analysis_only|screenshot_only]",
        summary: "Show or switch the content mode",
    },
    Command {
        name: "config",
        aliases: &["settings"],
        sub: None,
        kind: CommandKind::Config,
        required_role: Role::User,
        usage: "/config",
        summary: "Show the active settings",
    },
    Command {
        name: "help",
        aliases: &[],
        sub: None,
        kind: CommandKind::Help,
        required_role: Role::User,
        usage: "/help",
        summary: "List commands",
    },
];

impl Command {
    fn matches(&self, word: &str) -> bool {
        self.name.eq_ignore_ascii_case(word)
            || self.aliases.iter().any(|a| a.eq_ignore_ascii_case(word))
    }

    fn usage_name(&self) -> String {
        match self.sub {
            Some(sub) => format!("{} {sub}", self.name),
            None => self.name.to_string(),
        }
    }
}

/// Find the row for `head` and return it with the remaining arguments.
///
/// A row whose `sub` matches the first argument wins over the bare row.
pub fn lookup<'a>(head: &str, args: &'a [&'a str]) -> Option<(&'static Command, &'a [&'a str])> {
    let candidates = || COMMANDS.iter().filter(|c| c.matches(head));

    if let Some(first) = args.first()
        && let Some(command) =
            candidates().find(|c| c.sub.is_some_and(|s| s.eq_ignore_ascii_case(first)))
    {
        return Some((command, &args[1..]));
    }
    candidates().find(|c| c.sub.is_none()).map(|c| (c, args))
}

/// Routes chat text to commands.
pub struct Dispatcher {
    app: Arc<App>,
}

impl Dispatcher {
    pub fn new(app: Arc<App>) -> Self {
        Self { app }
    }

    /// Handle one chat message. `None` means the message needs no reply.
    pub async fn dispatch(
        &self,
        text: &str,
        role: Role,
    ) -> Result<Option<Presentation>, CommandError> {
        let text = text.trim();
        let Some(body) = text.strip_prefix('/') else {
            return Ok(self.auto_analyze(text).await);
        };

        let mut words = body.split_whitespace();
        let head = words.next().unwrap_or_default();
        let rest: Vec<&str> = words.collect();
        let (command, args) =
            lookup(head, &rest).ok_or_else(|| CommandError::Unknown(head.to_lowercase()))?;

        if role < command.required_role {
            return Err(CommandError::Forbidden {
                command: command.usage_name(),
                required: command.required_role,
            });
        }
        tracing::debug!(command = command.name, sub = command.sub, %role, "dispatching command");

        let reply = match command.kind {
            CommandKind::Analyze => self.analyze(command, args, self.app.mode()).await?,
            CommandKind::Screenshot => {
                self.analyze(command, args, ContentMode::ScreenshotOnly).await?
            }
            CommandKind::CacheStats => self.cache_stats().await,
            CommandKind::CacheClear => {
                let removed = self.app.pipeline.clear_cache().await?;
                tracing::info!(removed, "cache cleared by command");
                Presentation::text(format!("Cache cleared ({removed} persisted entries removed)."))
            }
            CommandKind::Export => self.export(command, args).await?,
            CommandKind::Mode => self.mode(command, args)?,
            CommandKind::Config => Presentation::text(self.config_summary()),
            CommandKind::Help => Presentation::text(help_text(role)),
        };
        Ok(Some(reply))
    }

    async fn auto_analyze(&self, text: &str) -> Option<Presentation> {
        if !self.app.config.auto_analyze {
            return None;
        }
        let urls = self.find_urls(text);
        if urls.is_empty() {
            return None;
        }
        tracing::debug!(count = urls.len(), "auto-analyzing message links");
        Some(self.render(&urls, self.app.mode()).await)
    }

    async fn analyze(
        &self,
        command: &Command,
        args: &[&str],
        mode: ContentMode,
    ) -> Result<Presentation, CommandError> {
        let urls = self.find_urls(&args.join(" "));
        if urls.is_empty() {
            return Err(CommandError::Usage(command.usage.to_string()));
        }
        Ok(self.render(&urls, mode).await)
    }

    /// `all` exports every live in-memory analysis; a URL is analyzed first
    /// unless a cached result exists.
    async fn export(&self, command: &Command, args: &[&str]) -> Result<Presentation, CommandError> {
        let usage = || CommandError::Usage(command.usage.to_string());
        let (target, format) = match args {
            [target] => (*target, ExportFormat::default()),
            [target, format] => (*target, format.parse::<ExportFormat>().map_err(|_| usage())?),
            _ => return Err(usage()),
        };

        let results = if target.eq_ignore_ascii_case("all") {
            self.app.pipeline.cached_results().await
        } else {
            let urls = self.find_urls(target);
            let [url] = urls.as_slice() else {
                return Err(usage());
            };
            // Exports are text documents, so never analyze screenshot-only here.
            let mode = match self.app.mode() {
                ContentMode::ScreenshotOnly => ContentMode::AnalysisOnly,
                mode => mode,
            };
            match self.app.analyze(&[url], mode).await.into_iter().next() {
                Some(AnalysisOutcome::Done { result, .. }) => vec![result],
                Some(AnalysisOutcome::Failed(failure)) => {
                    return Ok(Presentation::text(failure.message));
                }
                None => return Err(usage()),
            }
        };

        if results.is_empty() {
            return Ok(Presentation::text("No cached analyses to export."));
        }

        let dir = self.app.config.cache_dir.join("exports");
        let path = export::write(&results, format, &dir).await?;
        Ok(Presentation {
            text: format!(
                "Exported {} analyses as {format}.\nFile: {}",
                results.len(),
                path.display()
            ),
            files: vec![path],
            ..Default::default()
        })
    }

    fn mode(&self, command: &Command, args: &[&str]) -> Result<Presentation, CommandError> {
        match args {
            [] => Ok(Presentation::text(format!("Content mode: {}", self.app.mode()))),
            [name] => {
                let mode = name
                    .parse::<ContentMode>()
                    .map_err(|_| CommandError::Usage(command.usage.to_string()))?;
                let previous = self.app.set_mode(mode);
                Ok(Presentation::text(format!("Content mode: {previous} -> {mode}")))
            }
            _ => Err(CommandError::Usage(command.usage.to_string())),
        }
    }

    fn find_urls(&self, text: &str) -> Vec<String> {
        let config = &self.app.config;
        extract_urls(text, config.allow_protocolless_urls, &config.default_protocol)
    }

    async fn render(&self, urls: &[String], mode: ContentMode) -> Presentation {
        let outcomes = self.app.analyze(urls, mode).await;
        let pipeline = &self.app.pipeline;
        present(&outcomes, pipeline.screenshots(), pipeline.companion_dir()).await
    }

    async fn cache_stats(&self) -> Presentation {
        let stats = self.app.pipeline.stats().await;
        let mut lines = vec![
            format!(
                "Results: {} valid / {} expired (max {})",
                stats.results.valid, stats.results.expired, stats.results.max_size
            ),
            format!(
                "Screenshots: {} in memory (max {}), {} temp files",
                stats.screenshots.memory_entries,
                stats.screenshots.memory_capacity,
                stats.screenshots.active_files
            ),
            format!(
                "Active analyses: {} (peak {})",
                stats.activity.active, stats.activity.peak
            ),
        ];
        if let Some(persisted) = stats.persisted {
            lines.insert(1, format!("Persisted: {persisted}"));
        }
        Presentation::text(lines.join("\n"))
    }

    fn config_summary(&self) -> String {
        let c = &self.app.config;
        let on_off = |b: bool| if b { "on" } else { "off" };
        let summaries = match c.llm.endpoint {
            Some(_) => c.llm.model.as_str(),
            None => "off",
        };
        [
            format!("Content mode: {}", self.app.mode()),
            format!("Auto-analyze: {}", on_off(c.auto_analyze)),
            format!(
                "Cache: {} ({} entries, {} min)",
                on_off(c.enable_cache),
                c.cache_max_size,
                c.cache_ttl_minutes
            ),
            format!(
                "Screenshots: {} ({}x{})",
                on_off(c.screenshot.enabled),
                c.screenshot.width,
                c.screenshot.height
            ),
            format!("Summaries: {summaries}"),
            format!("Max concurrency: {}", c.effective_max_concurrency()),
        ]
        .join("\n")
    }
}

/// Commands available to `role`, one per line.
fn help_text(role: Role) -> String {
    let mut lines = vec!["Commands:".to_string()];
    for command in COMMANDS.iter().filter(|c| c.required_role <= role) {
        let mut line = format!("{} - {}", command.usage, command.summary);
        if !command.aliases.is_empty() {
            line.push_str(&format!(" (aliases: {})", command.aliases.join(", ")));
        }
        lines.push(line);
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::testing::{app, app_with};
    use linkscope_core::AppConfig;

    #[test]
    fn test_lookup_names_and_aliases() {
        assert_eq!(lookup("analyze", &[]).unwrap().0.kind, CommandKind::Analyze);
        assert_eq!(lookup("WEB", &[]).unwrap().0.kind, CommandKind::Analyze);
        assert_eq!(lookup("Summarize", &[]).unwrap().0.kind, CommandKind::Analyze);
        assert_eq!(lookup("shot", &[]).unwrap().0.kind, CommandKind::Screenshot);
        assert_eq!(lookup("settings", &[]).unwrap().0.kind, CommandKind::Config);
        assert!(lookup("nope", &[]).is_none());
    }

    #[test]
    fn test_lookup_subcommands() {
        let (command, rest) = lookup("cache", &["clear"]).unwrap();
        assert_eq!(command.kind, CommandKind::CacheClear);
        assert!(rest.is_empty());

        assert_eq!(lookup("cache", &["STATS"]).unwrap().0.kind, CommandKind::CacheStats);
        assert_eq!(lookup("cache", &[]).unwrap().0.kind, CommandKind::CacheStats);
    }

    #[tokio::test]
    async fn test_analyze_alias_runs_pipeline() {
        let t = app();
        let dispatcher = Dispatcher::new(t.app.clone());
        let reply = dispatcher
            .dispatch("/web https://one.test", Role::User)
            .await
            .unwrap()
            .unwrap();
        assert!(reply.text.contains("📄 one.test"));
    }

    #[tokio::test]
    async fn test_cache_clear_requires_admin() {
        let t = app();
        let dispatcher = Dispatcher::new(t.app.clone());

        let err = dispatcher.dispatch("/cache clear", Role::User).await.unwrap_err();
        assert!(matches!(err, CommandError::Forbidden { required: Role::Admin, .. }));
        assert!(err.is_user_facing());
        assert_eq!(err.to_string(), "/cache clear requires the admin role.");

        let reply = dispatcher.dispatch("/cache clear", Role::Admin).await.unwrap().unwrap();
        assert!(reply.text.starts_with("Cache cleared"));
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let t = app();
        let dispatcher = Dispatcher::new(t.app.clone());
        let err = dispatcher.dispatch("/Frobnicate now", Role::Admin).await.unwrap_err();
        assert!(matches!(err, CommandError::Unknown(name) if name == "frobnicate"));
    }

    #[tokio::test]
    async fn test_analyze_without_urls_is_usage_error() {
        let t = app();
        let dispatcher = Dispatcher::new(t.app.clone());
        let err = dispatcher.dispatch("/analyze please", Role::User).await.unwrap_err();
        assert!(matches!(err, CommandError::Usage(usage) if usage.starts_with("/analyze")));
    }

    #[tokio::test]
    async fn test_help_hides_admin_commands() {
        let t = app();
        let dispatcher = Dispatcher::new(t.app.clone());

        let user = dispatcher.dispatch("/help", Role::User).await.unwrap().unwrap();
        assert!(user.text.contains("/analyze"));
        assert!(!user.text.contains("/cache clear"));

        let admin = dispatcher.dispatch("/help", Role::Admin).await.unwrap().unwrap();
        assert!(admin.text.contains("/cache clear"));
    }

    #[tokio::test]
    async fn test_plain_message_auto_analyze() {
        let t = app();
        let dispatcher = Dispatcher::new(t.app.clone());

        assert!(dispatcher.dispatch("no links here", Role::User).await.unwrap().is_none());

        let reply = dispatcher
            .dispatch("look at https://two.test and https://down.test", Role::User)
            .await
            .unwrap();
        let text = reply.unwrap().text;
        assert!(text.starts_with("Analyzed 2 links (1 failed)"));
    }

    #[tokio::test]
    async fn test_plain_message_ignored_when_auto_analyze_off() {
        let t = app_with(AppConfig {
            auto_analyze: false,
            content_mode: ContentMode::AnalysisOnly,
            ..Default::default()
        });
        let dispatcher = Dispatcher::new(t.app.clone());
        assert!(dispatcher.dispatch("https://one.test", Role::User).await.unwrap().is_none());
    }

    #[test]
    fn test_lookup_export_and_mode() {
        assert_eq!(lookup("save", &[]).unwrap().0.kind, CommandKind::Export);
        let (command, rest) = lookup("mode", &["both"]).unwrap();
        assert_eq!(command.kind, CommandKind::Mode);
        assert_eq!(command.required_role, Role::Admin);
        assert_eq!(rest, ["both"]);
    }

    #[tokio::test]
    async fn test_mode_switch_requires_admin_and_applies() {
        let t = app();
        let dispatcher = Dispatcher::new(t.app.clone());

        let err = dispatcher.dispatch("/mode both", Role::User).await.unwrap_err();
        assert!(matches!(err, CommandError::Forbidden { required: Role::Admin, .. }));

        let shown = dispatcher.dispatch("/mode", Role::Admin).await.unwrap().unwrap();
        assert_eq!(shown.text, "Content mode: analysis_only");

        let switched = dispatcher
            .dispatch("/mode screenshot_only", Role::Admin)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(switched.text, "Content mode: analysis_only -> screenshot_only");
        assert_eq!(t.app.mode(), ContentMode::ScreenshotOnly);

        let settings = dispatcher.dispatch("/config", Role::User).await.unwrap().unwrap();
        assert!(settings.text.contains("Content mode: screenshot_only"));

        let err = dispatcher.dispatch("/mode video", Role::Admin).await.unwrap_err();
        assert!(matches!(err, CommandError::Usage(usage) if usage.starts_with("/mode")));
        assert_eq!(t.app.mode(), ContentMode::ScreenshotOnly);
    }

    #[tokio::test]
    async fn test_export_url_writes_file() {
        let t = app();
        let dispatcher = Dispatcher::new(t.app.clone());

        let reply = dispatcher
            .dispatch("/export https://one.test json", Role::User)
            .await
            .unwrap()
            .unwrap();
        assert!(reply.text.starts_with("Exported 1 analyses as json."));
        assert_eq!(reply.files.len(), 1);
        let path = &reply.files[0];
        assert!(path.starts_with(t.app.config.cache_dir.join("exports")));

        let raw = std::fs::read_to_string(path).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(doc["results"][0]["url"], "https://one.test/");
        assert_eq!(doc["results"][0]["title"], "one.test");
    }

    #[tokio::test]
    async fn test_export_all_uses_cached_results() {
        let t = app();
        let dispatcher = Dispatcher::new(t.app.clone());

        let empty = dispatcher.dispatch("/export all", Role::User).await.unwrap().unwrap();
        assert_eq!(empty.text, "No cached analyses to export.");
        assert!(empty.files.is_empty());

        dispatcher
            .dispatch("/analyze https://one.test https://two.test", Role::User)
            .await
            .unwrap();
        let reply = dispatcher.dispatch("/export ALL txt", Role::User).await.unwrap().unwrap();
        assert!(reply.text.starts_with("Exported 2 analyses as txt."));

        let doc = std::fs::read_to_string(&reply.files[0]).unwrap();
        assert!(doc.contains("1. https://one.test/"));
        assert!(doc.contains("2. https://two.test/"));
    }

    #[tokio::test]
    async fn test_export_bad_arguments() {
        let t = app();
        let dispatcher = Dispatcher::new(t.app.clone());

        for text in ["/export", "/export all pdf", "/export all md extra"] {
            let err = dispatcher.dispatch(text, Role::User).await.unwrap_err();
            assert!(
                matches!(err, CommandError::Usage(ref usage) if usage.starts_with("/export")),
                "{text}"
            );
        }

        let failed = dispatcher
            .dispatch("/export https://down.test", Role::User)
            .await
            .unwrap()
            .unwrap();
        assert!(failed.files.is_empty());
        assert!(failed.text.contains("down.test"));
    }

    #[tokio::test]
    async fn test_config_hides_api_key() {
        let mut config = AppConfig::default();
        config.llm.api_key = Some("sk-secret".into());
        let t = app_with(config);
        let dispatcher = Dispatcher::new(t.app.clone());

        let reply = dispatcher.dispatch("/settings", Role::User).await.unwrap().unwrap();
        assert!(reply.text.contains("Content mode"));
        assert!(!reply.text.contains("sk-secret"));
    }
}

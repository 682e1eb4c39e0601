//! External enumeration tools run as subprocesses.
//!
//! Output is streamed line by line so that names reach the candidate set
//! while the tool is still running; a killed tool keeps what it printed.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, stream};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_stream::wrappers::LinesStream;

use super::{NameStream, Priority, SourceAdapter, SourceContext, SourceDescriptor, SourceKind};
use crate::domain_utils::Target;
use crate::errors::{Result, SweepError};

/// One CLI tool: program name plus the argument template (`{target}` is
/// substituted).
#[derive(Debug, Clone)]
pub struct ActiveToolAdapter {
    descriptor: SourceDescriptor,
    program: String,
    args: Vec<String>,
}

impl ActiveToolAdapter {
    pub fn new(
        id: &str,
        priority: Priority,
        budget: Duration,
        program: &str,
        args: &[&str],
    ) -> Self {
        Self {
            descriptor: SourceDescriptor::new(id, SourceKind::ActiveTool, priority, budget),
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.descriptor.timeout_budget = budget;
        self
    }

    fn argv(&self, target: &Target) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.replace("{target}", target.as_str()))
            .collect()
    }
}

/// Built-in tool catalogue with default priorities and budgets.
pub fn catalogue() -> Vec<ActiveToolAdapter> {
    vec![
        ActiveToolAdapter::new(
            "subfinder",
            Priority::Critical,
            Duration::from_secs(300),
            "subfinder",
            &["-d", "{target}", "-silent", "-all"],
        ),
        ActiveToolAdapter::new(
            "assetfinder",
            Priority::Critical,
            Duration::from_secs(180),
            "assetfinder",
            &["--subs-only", "{target}"],
        ),
        ActiveToolAdapter::new(
            "amass",
            Priority::High,
            Duration::from_secs(600),
            "amass",
            &["enum", "-passive", "-d", "{target}"],
        ),
        ActiveToolAdapter::new(
            "findomain",
            Priority::Medium,
            Duration::from_secs(180),
            "findomain",
            &["-t", "{target}", "-q"],
        ),
    ]
}

#[async_trait]
impl SourceAdapter for ActiveToolAdapter {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    async fn preflight(&self) -> Result<()> {
        which::which(&self.program).map(drop).map_err(|e| {
            SweepError::source_unavailable(
                self.descriptor.id.as_str(),
                format!("'{}' not found in PATH: {e}", self.program),
            )
        })
    }

    fn run(&self, ctx: SourceContext) -> NameStream {
        let id = self.descriptor.id.to_string();
        let mut cmd = Command::new(&self.program);
        cmd.args(self.argv(&ctx.target))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let err = SweepError::source_failed(id, format!("spawn failed: {e}"));
                return stream::once(async move { Err(err) }).boxed();
            }
        };
        let Some(stdout) = child.stdout.take() else {
            let err = SweepError::source_failed(id, "stdout not captured");
            return stream::once(async move { Err(err) }).boxed();
        };

        let line_id = id.clone();
        let lines = LinesStream::new(BufReader::new(stdout).lines()).filter_map(move |line| {
            let id = line_id.clone();
            async move {
                match line {
                    Ok(l) if l.trim().is_empty() => None,
                    Ok(l) => Some(Ok(l.trim().to_string())),
                    Err(e) => Some(Err(SweepError::source_failed(id, format!("read error: {e}")))),
                }
            }
        });

        // Child is owned by this future; dropping the stream kills it.
        let exit = stream::once(async move { child.wait().await }).filter_map(move |status| {
            let id = id.clone();
            async move {
                match status {
                    Ok(s) if s.success() => None,
                    Ok(s) => Some(Err(SweepError::source_failed(id, format!("exited with {s}")))),
                    Err(e) => Some(Err(SweepError::source_failed(id, format!("wait failed: {e}")))),
                }
            }
        });

        lines.chain(exit).boxed()
    }

    fn manual_command(&self, target: &Target) -> Option<String> {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.argv(target));
        Some(parts.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::StaticResolver;
    use crate::sources::WildcardFilter;
    use std::sync::Arc;

    fn ctx() -> SourceContext {
        SourceContext {
            target: Target::parse("example.com").unwrap(),
            timeout_budget: Duration::from_secs(5),
            resolver: Arc::new(StaticResolver::new()),
            http: reqwest::Client::new(),
            wildcard: Arc::new(WildcardFilter::new()),
        }
    }

    #[test]
    fn catalogue_budgets_and_commands() {
        let tools = catalogue();
        let amass = tools.iter().find(|t| t.descriptor.id.as_str() == "amass").unwrap();
        assert_eq!(amass.descriptor.timeout_budget, Duration::from_secs(600));
        assert_eq!(amass.descriptor.priority, Priority::High);
        let target = Target::parse("example.com").unwrap();
        assert_eq!(
            amass.manual_command(&target).unwrap(),
            "amass enum -passive -d example.com"
        );
    }

    #[tokio::test]
    async fn missing_tool_is_unavailable() {
        let tool = ActiveToolAdapter::new(
            "ghost",
            Priority::Low,
            Duration::from_secs(1),
            "definitely-not-a-real-tool-xyz",
            &[],
        );
        let err = tool.preflight().await.unwrap_err();
        assert!(matches!(err, SweepError::SourceUnavailable { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn installed_tools_pass_preflight() {
        for program in ["sh", "/bin/sh"] {
            let tool = ActiveToolAdapter::new("shell", Priority::Low, Duration::from_secs(1), program, &[]);
            assert!(tool.preflight().await.is_ok(), "{program} not found");
        }
        let missing_path = ActiveToolAdapter::new(
            "ghost",
            Priority::Low,
            Duration::from_secs(1),
            "/nonexistent/bin/subfinder",
            &[],
        );
        assert!(missing_path.preflight().await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn streams_lines_and_reports_exit_status() {
        let ok = ActiveToolAdapter::new(
            "sh",
            Priority::Low,
            Duration::from_secs(5),
            "sh",
            &["-c", "printf 'a.{target}\\n\\n b.{target} \\n'"],
        );
        let items: Vec<_> = ok.run(ctx()).collect().await;
        let names: Vec<_> = items.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(names, vec!["a.example.com", "b.example.com"]);

        let failing = ActiveToolAdapter::new(
            "sh",
            Priority::Low,
            Duration::from_secs(5),
            "sh",
            &["-c", "echo x.{target}; exit 3"],
        );
        let items: Vec<_> = failing.run(ctx()).collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(items[1].is_err());
    }
}

//! CLI-facing orchestration.
//!
//! `App::run` turns parsed arguments into a process exit code:
//!   1. Schema generation early-exit
//!   2. Target parsing and config load / validation
//!   3. Source preflight (zero usable sources is fatal)
//!   4. Optional resume from a previous run
//!   5. Engine run, artifact writing
//!   6. Terminal summary in the requested format
//!
//! Exit codes: 0 success, 1 invalid input or configuration, 2 no sources
//! available, 3 partial completion.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, error, info, warn};

use crate::aggregator::RunReport;
use crate::cli::{Cli, OutputFormat};
use crate::config::Config;
use crate::domain_utils::Target;
use crate::engine::Engine;
use crate::errors::{Result, SweepError};
use crate::report::{self, ReportWriter, Summary};
use crate::sources::{self, SourceAdapter};
use crate::styled_output::StyledFormatter;

pub const EXIT_OK: i32 = 0;

/// Application façade.
pub struct App;

impl App {
    /// Execute one sweep and return the intended process exit code.
    pub async fn run(cli: &Cli) -> Result<i32> {
        if Self::maybe_print_schema(cli) {
            return Ok(EXIT_OK);
        }

        let target = match Self::parse_target(cli) {
            Ok(t) => t,
            Err(e) => return Ok(Self::fail(cli, &e)),
        };
        let config = match Self::load_config(cli) {
            Ok(c) => c,
            Err(e) => return Ok(Self::fail(cli, &e)),
        };

        let sources = match sources::build_sources(&config) {
            Ok(s) => s,
            Err(e) => return Ok(Self::fail(cli, &e)),
        };
        if let Err(e) = Self::preflight(&sources).await {
            return Ok(Self::fail(cli, &e));
        }

        let seed = if config.discovery.resume {
            Self::load_seed(cli, &config, &target)
        } else {
            Vec::new()
        };

        let engine = match Engine::builder(config)
            .sources(sources)
            .seed(seed)
            .listen_ctrl_c(true)
            .build()
        {
            Ok(engine) => engine,
            Err(e) => return Ok(Self::fail(cli, &e)),
        };

        let report = engine.run(target).await?;
        let writer = ReportWriter::new(
            &engine.config().output.directory,
            &report.target,
            engine.config().output.write_raw,
        );
        let summary = match writer.write(&report) {
            Ok(summary) => summary,
            Err(e) => {
                // Artifacts are lost but the run itself finished; still show it.
                if cli.error_enabled() {
                    eprintln!("Error writing results to {}: {e:#}", writer.dir().display());
                }
                error!(error = %e, "failed to write results");
                Summary::from_report(&report)
            }
        };

        Self::render(cli, &report, &summary, &writer);

        match report.facts.cancelled {
            Some(reason) => {
                let partial = SweepError::cancelled(reason);
                warn!(error = %partial, "run finished with partial results");
                Ok(partial.exit_code())
            }
            None => Ok(EXIT_OK),
        }
    }

    fn maybe_print_schema(cli: &Cli) -> bool {
        if !cli.generate_schema {
            return false;
        }
        match Summary::generate_json_schema() {
            Ok(schema) => println!("{schema}"),
            Err(e) => eprintln!("Error generating JSON schema: {e:#}"),
        }
        true
    }

    fn parse_target(cli: &Cli) -> Result<Target> {
        let raw = cli
            .target
            .as_deref()
            .ok_or_else(|| SweepError::invalid_target("", "no target given"))?;
        Target::parse(raw)
    }

    fn load_config(cli: &Cli) -> Result<Config> {
        let mut config = Config::from_env();
        config.merge_with_cli(cli);
        config.validate()?;
        Ok(config)
    }

    /// Fails only when every selected source is unusable.
    async fn preflight(sources: &[Arc<dyn SourceAdapter>]) -> Result<()> {
        let checks = join_all(sources.iter().map(|s| s.preflight())).await;
        let mut available = 0usize;
        for (source, check) in sources.iter().zip(checks) {
            match check {
                Ok(()) => available += 1,
                Err(e) => debug!(source = %source.descriptor().id, error = %e, "source unavailable"),
            }
        }
        info!(selected = sources.len(), available, "source preflight");
        if available == 0 {
            return Err(SweepError::no_sources(format!(
                "{} selected, none usable",
                sources.len()
            )));
        }
        Ok(())
    }

    fn load_seed(cli: &Cli, config: &Config, target: &Target) -> Vec<String> {
        match report::read_previous(&config.output.directory, target) {
            Ok(names) => {
                if names.is_empty() && cli.warn_enabled() {
                    eprintln!("No previous results for {target}; starting fresh.");
                }
                names
            }
            Err(e) => {
                if cli.warn_enabled() {
                    eprintln!("Warning: could not read previous results: {e}");
                }
                Vec::new()
            }
        }
    }

    fn fail(cli: &Cli, e: &SweepError) -> i32 {
        if cli.error_enabled() {
            eprintln!("Error: {e}");
        }
        error!(category = %e.category(), error = %e, "run aborted before start");
        e.exit_code()
    }

    fn render(cli: &Cli, report: &RunReport, summary: &Summary, writer: &ReportWriter) {
        let structured = match cli.effective_format() {
            OutputFormat::Json => Some(summary.to_json()),
            OutputFormat::Yaml => Some(summary.to_yaml()),
            OutputFormat::Styled => {
                Self::print_styled(StyledFormatter::new(), report, summary, writer);
                None
            }
            OutputFormat::Plain => {
                Self::print_styled(StyledFormatter::without_colors(), report, summary, writer);
                None
            }
        };
        match structured {
            Some(Ok(text)) => println!("{text}"),
            Some(Err(e)) => eprintln!("Error formatting structured output: {e:#}"),
            None => {}
        }
    }

    fn print_styled(
        formatter: StyledFormatter,
        report: &RunReport,
        summary: &Summary,
        writer: &ReportWriter,
    ) {
        if let Err(e) = formatter.print_report(report, summary, Some(writer.dir())) {
            eprintln!("Error formatting styled output: {e}");
        }
    }
}

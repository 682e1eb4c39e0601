use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Output format for the terminal summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Coloured, sectioned summary (default when attached to a terminal)
    Styled,
    /// Plain text without ANSI escapes
    Plain,
    /// JSON summary document
    Json,
    /// YAML summary document
    Yaml,
}

/// Command-line interface definition.
///
/// Verbosity levels:
/// 0 - silent (only final output)
/// 1 - errors (default)
/// 2 - warnings + progress
/// 5 - trace/debug
#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about = "Discover subdomains from many sources, validate them and probe for live HTTP services"
)]
pub struct Cli {
    /// Root domain to enumerate (e.g. example.com). Required unless --generate-schema is given.
    #[arg(required_unless_present = "generate_schema")]
    pub target: Option<String>,

    /// Output directory; results land in <DIR>/<target>/
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Timeout in seconds applied to every discovery source (overrides per-source budgets)
    #[arg(short = 't', long = "timeout", value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Only run passive API sources
    #[arg(long, conflicts_with = "active_only")]
    pub passive_only: bool,

    /// Only run active tools and DNS brute force
    #[arg(long)]
    pub active_only: bool,

    /// Overall wall-clock budget for the run in seconds
    #[arg(long, value_name = "SECS")]
    pub deadline: Option<u64>,

    /// Skip HTTP probing of resolved names
    #[arg(long)]
    pub no_probe: bool,

    /// Generate and resolve permutations of discovered names after the first wave
    #[arg(long)]
    pub permutations: bool,

    /// Wordlist for DNS brute force (built-in list when omitted)
    #[arg(long, value_name = "FILE")]
    pub wordlist: Option<PathBuf>,

    /// Disable DNS brute force
    #[arg(long)]
    pub no_bruteforce: bool,

    /// Seed the run with subdomains.txt from a previous run in the output directory
    #[arg(long)]
    pub resume: bool,

    /// Initial number of in-flight validations
    #[arg(long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// Upper bound for in-flight validations
    #[arg(long, value_name = "N")]
    pub max_concurrency: Option<usize>,

    /// Verbosity level (0,1,2,5)
    #[arg(long, default_value_t = 1)]
    pub verbose: u8,

    /// Terminal summary format (defaults to styled on a TTY, plain otherwise)
    #[arg(long, value_enum)]
    pub format: Option<OutputFormat>,

    /// Print the JSON schema of summary.json and exit
    #[arg(long)]
    pub generate_schema: bool,
}

impl Cli {
    /// Parse CLI arguments from process args.
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Convenience: are we in very verbose/debug mode?
    pub fn is_trace(&self) -> bool {
        self.verbose >= 5
    }

    /// Are warning and progress messages enabled?
    pub fn warn_enabled(&self) -> bool {
        self.verbose >= 2
    }

    /// Are error-level messages enabled?
    pub fn error_enabled(&self) -> bool {
        self.verbose >= 1
    }

    /// Resolve the summary format, falling back to TTY detection.
    pub fn effective_format(&self) -> OutputFormat {
        match self.format {
            Some(f) => f,
            None if atty::is(atty::Stream::Stdout) => OutputFormat::Styled,
            None => OutputFormat::Plain,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_flag_set() {
        let cli = Cli::try_parse_from([
            "subsweep",
            "example.com",
            "-o",
            "/tmp/out",
            "-t",
            "30",
            "--passive-only",
            "--deadline",
            "120",
            "--no-probe",
            "--concurrency",
            "20",
            "--format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.target.as_deref(), Some("example.com"));
        assert_eq!(cli.timeout, Some(30));
        assert!(cli.passive_only);
        assert_eq!(cli.deadline, Some(120));
        assert_eq!(cli.effective_format(), OutputFormat::Json);
        assert_eq!(cli.concurrency, Some(20));
    }

    #[test]
    fn passive_and_active_only_conflict() {
        let res = Cli::try_parse_from([
            "subsweep",
            "example.com",
            "--passive-only",
            "--active-only",
        ]);
        assert!(res.is_err());
    }

    #[test]
    fn target_optional_with_schema_flag() {
        let cli = Cli::try_parse_from(["subsweep", "--generate-schema"]).unwrap();
        assert!(cli.target.is_none());
        assert!(Cli::try_parse_from(["subsweep"]).is_err());
    }

    #[test]
    fn verbosity_levels() {
        let at = |v: &str| Cli::try_parse_from(["subsweep", "example.com", "--verbose", v]).unwrap();
        let silent = at("0");
        assert!(!silent.error_enabled() && !silent.warn_enabled() && !silent.is_trace());
        let default = at("1");
        assert!(default.error_enabled() && !default.warn_enabled());
        let info = at("3");
        assert!(info.warn_enabled() && !info.is_trace());
        assert!(at("5").is_trace());
    }
}

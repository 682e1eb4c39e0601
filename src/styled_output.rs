//! Terminal rendering of a finished run using anstyle.
//!
//! The same formatter produces the `plain` format by switching colours off.

use anstyle::{AnsiColor, Color, Style};
use std::fmt::Write;
use std::io::{self, Write as IoWrite};
use std::path::Path;

use crate::aggregator::RunReport;
use crate::report::{Summary, live_line};
use crate::sources::SourceStatus;

/// Hosts listed per section before the rest is summarised as "... and N more".
const LIST_LIMIT: usize = 25;

const RULE: &str =
    "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";

/// Style definitions for different UI elements
pub struct Styles {
    pub header: Style,
    pub subheader: Style,
    pub success: Style,
    pub warning: Style,
    pub error: Style,
    pub info: Style,
    pub muted: Style,
    pub bold: Style,
    pub url: Style,
    pub critical: Style,
}

impl Default for Styles {
    fn default() -> Self {
        Self {
            header: Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Blue))),
            subheader: Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Cyan))),
            success: Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Green))),
            warning: Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Yellow))),
            error: Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Red))),
            info: Style::new().fg_color(Some(Color::Ansi(AnsiColor::Blue))),
            muted: Style::new().fg_color(Some(Color::Ansi(AnsiColor::BrightBlack))),
            bold: Style::new().bold(),
            url: Style::new()
                .fg_color(Some(Color::Ansi(AnsiColor::Blue)))
                .underline(),
            critical: Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Magenta))),
        }
    }
}

/// Styled output formatter for run reports
pub struct StyledFormatter {
    styles: Styles,
    use_colors: bool,
}

impl StyledFormatter {
    pub fn new() -> Self {
        Self {
            styles: Styles::default(),
            use_colors: Self::should_use_colors(),
        }
    }

    pub fn without_colors() -> Self {
        Self {
            styles: Styles::default(),
            use_colors: false,
        }
    }

    fn should_use_colors() -> bool {
        atty::is(atty::Stream::Stdout) && std::env::var("NO_COLOR").is_err()
    }

    fn styled(&self, text: &str, style: &Style) -> String {
        if self.use_colors {
            format!("{}{}{}", style.render(), text, style.render_reset())
        } else {
            text.to_string()
        }
    }

    pub fn format_report(
        &self,
        report: &RunReport,
        summary: &Summary,
        output_dir: Option<&Path>,
    ) -> Result<String, std::fmt::Error> {
        let mut output = String::new();
        self.write_header(&mut output, summary)?;
        self.write_counts(&mut output, summary)?;
        self.write_critical(&mut output, report)?;
        self.write_live(&mut output, report)?;
        self.write_sources(&mut output, summary)?;
        self.write_fallbacks(&mut output, summary)?;
        self.write_footer(&mut output, summary, output_dir)?;
        Ok(output)
    }

    fn write_header(&self, output: &mut String, summary: &Summary) -> Result<(), std::fmt::Error> {
        writeln!(output)?;
        writeln!(output, "{}", self.styled(RULE, &self.styles.muted))?;
        let title = format!("🔎 Subdomain sweep of {}", summary.target);
        writeln!(output, "  {}", self.styled(&title, &self.styles.header))?;
        if summary.partial {
            let reason = match summary.partial_reason {
                Some(r) => format!("{r:?}").to_lowercase(),
                None => "cancelled".to_string(),
            };
            writeln!(
                output,
                "  {} {}",
                self.styled("⚠️", &self.styles.warning),
                self.styled(
                    &format!("Partial results ({reason})"),
                    &self.styles.warning
                )
            )?;
        }
        writeln!(output, "{}", self.styled(RULE, &self.styles.muted))?;
        Ok(())
    }

    fn write_counts(&self, output: &mut String, summary: &Summary) -> Result<(), std::fmt::Error> {
        writeln!(output)?;
        let rows = [
            ("Discovered", summary.total_discovered),
            ("Resolved", summary.unique_validated),
            ("Live", summary.live_confirmed),
            ("Critical", summary.critical_identified),
        ];
        for (label, value) in rows {
            writeln!(
                output,
                "    {:<12} {}",
                self.styled(label, &self.styles.muted),
                self.styled(&value.to_string(), &self.styles.bold)
            )?;
        }
        let rejected: u64 = summary.rejected_candidates.values().sum();
        if rejected > 0 {
            writeln!(
                output,
                "    {:<12} {}",
                self.styled("Rejected", &self.styles.muted),
                self.styled(&rejected.to_string(), &self.styles.muted)
            )?;
        }
        Ok(())
    }

    fn write_critical(&self, output: &mut String, report: &RunReport) -> Result<(), std::fmt::Error> {
        let critical: Vec<_> = report.critical().collect();
        if critical.is_empty() {
            return Ok(());
        }
        writeln!(output)?;
        writeln!(
            output,
            "  {}",
            self.styled("🎯 Critical Hosts", &self.styles.subheader)
        )?;
        for r in critical.iter().take(LIST_LIMIT) {
            let status = match r.http_status {
                Some(s) => s.to_string(),
                None => "-".to_string(),
            };
            writeln!(
                output,
                "    {} {}",
                self.styled(&r.candidate, &self.styles.critical),
                self.styled(&status, &self.styles.muted)
            )?;
        }
        self.write_overflow(output, critical.len())
    }

    fn write_live(&self, output: &mut String, report: &RunReport) -> Result<(), std::fmt::Error> {
        let live: Vec<String> = report.live().filter_map(live_line).collect();
        if live.is_empty() {
            return Ok(());
        }
        writeln!(output)?;
        writeln!(
            output,
            "  {}",
            self.styled("🌐 Live Hosts", &self.styles.subheader)
        )?;
        for line in live.iter().take(LIST_LIMIT) {
            let (url, rest) = line.split_once(' ').unwrap_or((line.as_str(), ""));
            writeln!(
                output,
                "    {} {}",
                self.styled(url, &self.styles.url),
                self.styled(rest, &self.styles.muted)
            )?;
        }
        self.write_overflow(output, live.len())
    }

    fn write_overflow(&self, output: &mut String, total: usize) -> Result<(), std::fmt::Error> {
        if total > LIST_LIMIT {
            writeln!(
                output,
                "    {}",
                self.styled(
                    &format!("... and {} more", total - LIST_LIMIT),
                    &self.styles.muted
                )
            )?;
        }
        Ok(())
    }

    fn write_sources(&self, output: &mut String, summary: &Summary) -> Result<(), std::fmt::Error> {
        if summary.sources.is_empty() {
            return Ok(());
        }
        writeln!(output)?;
        writeln!(output, "  {}", self.styled("📡 Sources", &self.styles.subheader))?;
        for s in &summary.sources {
            let (mark, style) = match s.status {
                SourceStatus::Completed => ("✓", &self.styles.success),
                SourceStatus::Unavailable => ("-", &self.styles.muted),
                SourceStatus::TimedOut | SourceStatus::Cancelled => ("⏱", &self.styles.warning),
                SourceStatus::Failed => ("✗", &self.styles.error),
            };
            let unique = summary.per_source_counts.get(&s.id).copied().unwrap_or(0);
            writeln!(
                output,
                "    {} {:<18} {}",
                self.styled(mark, style),
                s.id,
                self.styled(
                    &format!("{unique} names, {:.1}s", s.duration_ms as f64 / 1000.0),
                    &self.styles.muted
                )
            )?;
        }
        Ok(())
    }

    fn write_fallbacks(&self, output: &mut String, summary: &Summary) -> Result<(), std::fmt::Error> {
        let failed = &summary.manual_fallback_commands;
        if failed.is_empty() {
            return Ok(());
        }
        writeln!(output)?;
        writeln!(
            output,
            "  {}",
            self.styled("🛠  Re-run by hand", &self.styles.subheader)
        )?;
        for fb in failed {
            writeln!(
                output,
                "    {} {}",
                self.styled("$", &self.styles.muted),
                self.styled(&fb.command, &self.styles.info)
            )?;
        }
        Ok(())
    }

    fn write_footer(
        &self,
        output: &mut String,
        summary: &Summary,
        output_dir: Option<&Path>,
    ) -> Result<(), std::fmt::Error> {
        writeln!(output)?;
        writeln!(output, "{}", self.styled(RULE, &self.styles.muted))?;
        let mut line = format!(
            "  Completed in {:.1}s · peak concurrency {}",
            summary.duration_seconds, summary.concurrency.peak_in_flight
        );
        if let Some(dir) = output_dir {
            let _ = write!(line, " · results in {}", dir.display());
        }
        writeln!(output, "{}", self.styled(&line, &self.styles.muted))?;
        Ok(())
    }

    pub fn print_report(
        &self,
        report: &RunReport,
        summary: &Summary,
        output_dir: Option<&Path>,
    ) -> io::Result<()> {
        let formatted = self
            .format_report(report, summary, output_dir)
            .map_err(|e| io::Error::other(e.to_string()))?;
        print!("{formatted}");
        io::stdout().flush()?;
        Ok(())
    }
}

impl Default for StyledFormatter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::{ResultAggregator, RunFacts};
    use crate::candidates::{CandidateSet, SourceId};
    use crate::concurrency::LimiterStats;
    use crate::deadline::CancelReason;
    use crate::domain_utils::Target;
    use crate::pipeline::ValidationResult;
    use chrono::Utc;
    use std::collections::BTreeSet;
    use std::time::Duration;

    fn report(cancelled: Option<CancelReason>) -> RunReport {
        let set = CandidateSet::new(Target::parse("example.com").unwrap());
        set.ingest("www.example.com", &SourceId::new("crtsh")).unwrap();
        set.insert_unattributed("staging.example.com").unwrap();
        let mut agg = ResultAggregator::new();
        let mut r = ValidationResult {
            candidate: "www.example.com".into(),
            resolved: true,
            addresses: BTreeSet::new(),
            cnames: vec![],
            http_status: Some(200),
            title: Some("Welcome".into()),
            redirect_chain: vec!["https://www.example.com/".into()],
            final_url: Some("https://www.example.com/".into()),
            is_live: true,
            is_critical: false,
            dns_attempts: 1,
            dns_error: None,
            probe_error: None,
            validated_at: Utc::now(),
        };
        agg.record_validation(r.clone());
        r.candidate = "staging.example.com".into();
        r.is_critical = true;
        r.http_status = None;
        r.is_live = false;
        agg.record_critical(r);
        agg.finish(
            &set,
            RunFacts {
                started_at: Utc::now(),
                duration: Duration::from_secs(3),
                cancelled,
                concurrency: LimiterStats {
                    limit: 50,
                    in_flight: 0,
                    peak_in_flight: 2,
                    completed: 2,
                    errors: 0,
                    increases: 0,
                    decreases: 0,
                },
                phases: vec![],
                probing: true,
            },
        )
    }

    #[test]
    fn plain_rendering_lists_hosts() {
        let rep = report(None);
        let summary = Summary::from_report(&rep);
        let out = StyledFormatter::without_colors()
            .format_report(&rep, &summary, Some(Path::new("results/example.com")))
            .unwrap();
        assert!(out.contains("Subdomain sweep of example.com"));
        assert!(out.contains("https://www.example.com/ 200 [Welcome]"));
        assert!(out.contains("staging.example.com -"));
        assert!(out.contains("results in results/example.com"));
        assert!(!out.contains("Partial"));
        assert!(!out.contains('\u{1b}'));
    }

    #[test]
    fn partial_runs_are_flagged() {
        let rep = report(Some(CancelReason::Deadline));
        let summary = Summary::from_report(&rep);
        let out = StyledFormatter::without_colors()
            .format_report(&rep, &summary, None)
            .unwrap();
        assert!(out.contains("Partial results (deadline)"));
    }
}

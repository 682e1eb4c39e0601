//! Subsweep Library
//!
//! Discovers subdomains of a target from many independent sources, merges
//! them into one attributed candidate set, validates every candidate by DNS
//! and HTTP under an adaptive concurrency limit, and guarantees that a
//! catalogue of high-value names is always tested.
//!
//! - Discovery sources: external tools, passive APIs, DNS brute force
//! - Deduplicating, attributing candidate set with syntax filtering
//! - Retried DNS resolution and HTTP probing with redirect tracking
//! - Critical-pattern pass, run deadline, partial results
//!
//! # Example
//!
//! ```rust,no_run
//! use subsweep::config::Config;
//! use subsweep::domain_utils::Target;
//! use subsweep::engine::Engine;
//!
//! # async fn demo() -> subsweep::Result<()> {
//! let engine = Engine::builder(Config::default()).build()?;
//! let report = engine.run(Target::parse("example.com")?).await?;
//! for live in report.live() {
//!     println!("{} {:?}", live.candidate, live.http_status);
//! }
//! # Ok(())
//! # }
//! ```

pub mod aggregator;
pub mod app;
pub mod candidates;
pub mod cli;
pub mod concurrency;
pub mod config;
pub mod critical;
pub mod deadline;
pub mod domain_utils;
pub mod engine;
pub mod errors;
pub mod pipeline;
pub mod probe;
pub mod progress;
pub mod report;
pub mod resolver;
pub mod retry;
pub mod sources;
pub mod styled_output;

pub use aggregator::{CandidateRecord, RunReport};
pub use candidates::{Candidate, CandidateSet, SourceId};
pub use config::Config;
pub use critical::CriticalPatternCatalogue;
pub use domain_utils::Target;
pub use engine::{Engine, EngineBuilder};
pub use errors::{ErrorCategory, Result, SweepError};
pub use pipeline::ValidationResult;
pub use report::{ReportWriter, Summary};
pub use sources::{SourceAdapter, SourceDescriptor, SourceKind};
pub use styled_output::StyledFormatter;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");

use subsweep::app::App;
use subsweep::cli::Cli;
use tracing_subscriber::EnvFilter;

/// Map the CLI verbosity levels onto a tracing filter; `RUST_LOG` wins when set.
fn init_tracing(cli: &Cli) {
    let level = if cli.is_trace() {
        "trace"
    } else if cli.warn_enabled() {
        "info"
    } else if cli.error_enabled() {
        "error"
    } else {
        "off"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("subsweep={level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::from_args();
    init_tracing(&cli);

    let code = match App::run(&cli).await {
        Ok(code) => code,
        Err(e) => {
            if cli.error_enabled() {
                eprintln!("Error: {e}");
            }
            e.exit_code()
        }
    };
    std::process::exit(code);
}

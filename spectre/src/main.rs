use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use nmap_runner::{NmapScanner, ProgressTracker, ScanOutcome};
use scan_output::{ScanContext, ScanMetadata, ScanSummary};
use spectre_core::{PortSpec, ScanError, ScanRequest};
use std::future::Future;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod config;
mod deps;

#[derive(Debug, Parser)]
#[command(name = "spectre", version, about = "Network scanner front end: runs nmap and writes CSV/JSON reports")]
struct Cli {
    /// Optional config file (YAML). If omitted, loads ./spectre.yaml if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print version information
    Version,
    /// Scan a target with nmap and write a report
    Scan(ScanArgs),
}

#[derive(Debug, Args)]
struct ScanArgs {
    /// Target IP, CIDR block or hostname
    #[arg(short, long)]
    target: String,
    /// Output file. Default: scan_<YYYYmmdd_HHMMSS>.<format>
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Output format
    #[arg(short, long, value_parser = ["csv", "json"])]
    format: Option<String>,
    /// Ports: list/range (22,80,443 or 1-1024), topN or all. Default: top1000
    #[arg(short, long)]
    ports: Option<String>,
    /// Scan deadline in seconds. Default: 300
    #[arg(long)]
    timeout: Option<u64>,
    /// Max packets per second hint passed to nmap; 0 disables it. Default: 1000
    #[arg(long)]
    rate: Option<u32>,
    /// Path to the nmap binary
    #[arg(long, value_name = "PATH")]
    nmap: Option<String>,
    /// Skip OS detection (does not need root)
    #[arg(long)]
    no_os: bool,
    /// Skip service/version detection
    #[arg(long)]
    no_service: bool,
    /// Extra flag passed to nmap verbatim (repeatable)
    #[arg(long = "extra-arg", value_name = "FLAG", allow_hyphen_values = true)]
    extra_args: Vec<String>,
}

impl ScanArgs {
    fn overrides(&self) -> config::ScanConfig {
        config::ScanConfig {
            ports: self.ports.clone(),
            timeout_secs: self.timeout,
            rate: self.rate,
            format: self.format.clone(),
            nmap_path: self.nmap.clone(),
            os_detection: self.no_os.then_some(false),
            service_detection: self.no_service.then_some(false),
            extra_args: (!self.extra_args.is_empty()).then(|| self.extra_args.clone()),
            ..config::ScanConfig::default()
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).with_target(false).init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    if let Err(e) = run(cli) {
        std::process::exit(report_error(&e));
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Version => {
            println!("spectre {} (core {})", env!("CARGO_PKG_VERSION"), spectre_core::version());
        }
        Commands::Scan(args) => {
            let file_cfg = config::load_config(cli.config.as_deref())?.and_then(|c| c.scan);
            let settings = config::Settings::resolve(args.overrides(), file_cfg)?;
            scan(&args, &settings)?;
        }
    }
    Ok(())
}

fn scan(args: &ScanArgs, settings: &config::Settings) -> Result<()> {
    let kind = targets::validate_target(&args.target)?;
    tracing::debug!(?kind, "target accepted");
    let request = ScanRequest::new(args.target.as_str(), PortSpec::parse(&settings.ports), settings.timeout)?
        .with_rate_limit(settings.rate);

    let rt = tokio::runtime::Runtime::new()?;
    let scanner = NmapScanner::new(settings.engine.clone());
    let outcome: ScanOutcome = rt.block_on(async {
        deps::check_nmap(&scanner.options().program, deps::CHECK_LIMIT).await?;
        run_until_interrupted(&scanner, &request, async {
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        })
        .await
    })?;

    // The runtime's SIGINT handler stays installed; without this listener Ctrl-C would be ignored while writing.
    let _write_guard = rt.spawn(async {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("Scan cancelled by user");
            std::process::exit(ScanError::Interrupted.exit_code());
        }
    });

    let ctx = ScanContext {
        scan_id: outcome.scan_id.clone(),
        target: args.target.clone(),
        started_at: outcome.started_at,
        finished_at: outcome.finished_at,
        hosts_scanned: outcome.hosts_scanned,
    };
    let metadata = ScanMetadata::new(&ctx, &outcome.rows);
    let summary = ScanSummary::from_rows(&outcome.rows);
    let path = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(scan_output::default_output_filename(outcome.started_at, settings.format)));
    let saved = scan_output::write_report(&path, settings.format, &metadata, &summary, &outcome.rows)?;
    if outcome.degraded {
        println!("note: nmap XML was unusable; results were recovered from text output (no OS or product details)");
    }
    scan_output::print_summary(&metadata, &summary, Some(&saved));
    Ok(())
}

/// Run the scan until it finishes or `interrupt` resolves. An interrupt cancels the scan,
/// which terminates the engine before `Interrupted` comes back.
async fn run_until_interrupted<I>(scanner: &NmapScanner, request: &ScanRequest, interrupt: I) -> Result<ScanOutcome, ScanError>
where
    I: Future<Output = ()>,
{
    let cancel = CancellationToken::new();
    let mut progress = ProgressTracker::new();
    let scan = scanner.run(request, &mut progress, cancel.clone());
    tokio::pin!(scan, interrupt);
    tokio::select! {
        res = &mut scan => res,
        _ = &mut interrupt => {
            tracing::warn!("interrupt received, stopping scan");
            cancel.cancel();
            scan.await
        }
    }
}

/// Print the error and pick the exit status.
fn report_error(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<ScanError>() {
        Some(ScanError::Interrupted) => {
            println!("Scan cancelled by user");
            0
        }
        Some(e) => {
            eprintln!("error: {}", e);
            if let ScanError::Execution { diagnostics, .. } = e {
                if !diagnostics.is_empty() {
                    eprintln!("{}", diagnostics);
                }
            }
            if let Some(hint) = e.hint() {
                eprintln!("{}", hint);
            }
            e.exit_code()
        }
        None => {
            eprintln!("error: {:#}", err);
            1
        }
    }
}

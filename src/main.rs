extern crate clap;

use std::io::IsTerminal;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use clap::Parser;
use clap_verbosity_flag::{Verbosity, WarnLevel};
use log::{debug, warn};
use tokio::time::timeout;
use url::Url;

use netspeed::channel::loopback::{LoopbackConnector, ProbeConfig};
use netspeed::channel::supervisor::spawn_supervisor;
use netspeed::channel::RealtimeChannel;
use netspeed::errors::{exit_codes, format_error_for_display, SpeedTestError};
use netspeed::report::{print_report, ConsoleReporter, DisplayMode, RunReport};
use netspeed::retry::RetryConfig;
use netspeed::server::{HttpTransport, DEFAULT_BASE_URL};
use netspeed::session::{TestSize, DEFAULT_TEST_SIZE_MB};
use netspeed::speedtest::{EngineConfig, Orchestrator, RunSummary, StartOutcome};

/// How long to wait for the real-time channel before starting anyway.
const CHANNEL_WAIT: Duration = Duration::from_secs(2);

static VERSION: LazyLock<String> = LazyLock::new(|| {
    match option_env!("NETSPEED_BUILD_GIT_HASH") {
        Some(hash) => format!("{} (rev {})", env!("CARGO_PKG_VERSION"), hash),
        None => env!("CARGO_PKG_VERSION").to_string(),
    }
});

#[derive(Parser)]
#[command(author, version = VERSION.as_str(), about, long_about = None)]
struct Cli {
    /// Base URL of the speed test server
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    server: Url,

    /// Payload size in megabytes for the download and upload phases
    #[arg(long, default_value_t = DEFAULT_TEST_SIZE_MB,
          value_parser = clap::value_parser!(u64).range(1..))]
    size: u64,

    /// Give up on the latency phase after this many seconds
    #[arg(long, default_value_t = 60,
          value_parser = clap::value_parser!(u64).range(1..))]
    latency_timeout: u64,

    /// Number of pings per latency probe
    #[arg(long, default_value_t = 10,
          value_parser = clap::value_parser!(u32).range(1..))]
    ping_samples: u32,

    /// Print the results as JSON
    #[arg(long)]
    json: bool,

    #[command(flatten)]
    verbose: Verbosity<WarnLevel>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.verbose.log_level_filter())
        .init();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", format_error_for_display(&e));
            e.exit_code()
        }
    };

    std::process::exit(code);
}

/// Exit code for a finished run.
fn exit_code_for(summary: &RunSummary) -> i32 {
    match summary.failures.as_slice() {
        [] => exit_codes::SUCCESS,
        [first, _, _] => first.exit_code(),
        _ => exit_codes::PARTIAL_FAILURE,
    }
}

async fn run(cli: Cli) -> Result<i32, SpeedTestError> {
    let size = TestSize::new(cli.size)?;
    let mode = DisplayMode::detect(cli.json, std::io::stdout().is_terminal());
    let transport = HttpTransport::new(cli.server.clone())?;

    let server_info = match transport.server_info().await {
        Ok(info) => Some(info),
        Err(e) => {
            warn!("Could not fetch server info: {}", e);
            None
        }
    };

    let channel = Arc::new(RealtimeChannel::with_generated_id());
    let probe = ProbeConfig {
        samples: cli.ping_samples as usize,
        ..ProbeConfig::default()
    };
    let supervisor = spawn_supervisor(
        LoopbackConnector::new(Arc::new(transport.clone()), probe),
        channel.clone(),
        RetryConfig::default(),
    );
    if timeout(CHANNEL_WAIT, channel.wait_connected()).await.is_err() {
        warn!("Real-time channel not connected yet, latency test may fail");
    }
    debug!("Session id: {}", channel.session_id());

    let config = EngineConfig {
        size,
        latency_timeout: Duration::from_secs(cli.latency_timeout),
    };
    let engine = Orchestrator::new(transport, channel.clone(), config);
    let reporter = ConsoleReporter::new(mode);

    let outcome = tokio::select! {
        outcome = engine.start(&reporter) => outcome?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted");
            supervisor.shutdown();
            return Ok(exit_codes::INTERRUPTED);
        }
    };
    supervisor.shutdown();

    let summary = match outcome {
        StartOutcome::Completed(summary) => summary,
        StartOutcome::Rejected => {
            return Err(SpeedTestError::unknown("a run is already in progress"));
        }
    };

    if mode != DisplayMode::Json {
        for failure in &summary.failures {
            eprintln!("{}", format_error_for_display(failure));
        }
    }
    let code = exit_code_for(&summary);

    let RunSummary { session, rating, .. } = summary;
    let mut report =
        RunReport::new(channel.session_id(), cli.server.as_str(), session, rating);
    if let Some(info) = server_info {
        report = report.with_server_info(info);
    }

    print_report(mode, &report).map_err(|e| {
        SpeedTestError::unknown(format!("writing report: {}", e)).with_source(e)
    })?;

    Ok(code)
}

//! Engagement agent binary.
//!
//! Loads configuration, waits for the oracle sidecar, verifies the platform
//! credential, and then runs the cycle loop until SIGINT/SIGTERM.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use engage_agent::cycle::CycleSummary;
use engage_agent::exit_codes;
use engage_agent::io::config::{self, DEFAULT_CONFIG_PATH, Settings};
use engage_agent::io::content::HttpContentGateway;
use engage_agent::io::oracle::HttpOracleGateway;
use engage_agent::logging::{self, LogFormat};
use engage_agent::scheduler::{Agent, LoopStop};
use engage_agent::start::{verify_identity, wait_for_oracle};

#[derive(Parser)]
#[command(
    name = "engage-agent",
    version,
    about = "Autonomous, quota-bounded engagement loop"
)]
struct Cli {
    /// Path to the TOML config file. A missing file means defaults.
    #[arg(long, global = true, env = "AGENT_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Diagnostic log format on stderr.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Compact)]
    log_format: LogFormat,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the engagement loop until stopped.
    Run {
        /// Run a single cycle and exit.
        #[arg(long)]
        once: bool,
        /// Print each cycle summary to stdout as one JSON line.
        #[arg(long)]
        summary_json: bool,
    },
    /// Load and validate configuration, then exit.
    CheckConfig,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.log_format);

    let code = match cli.command {
        Command::CheckConfig => cmd_check_config(&cli.config),
        Command::Run { once, summary_json } => cmd_run(&cli.config, once, summary_json).await,
    };
    std::process::exit(code);
}

fn load(path: &std::path::Path) -> Option<Settings> {
    match config::load_settings(path, |key| std::env::var(key).ok()) {
        Ok(settings) => Some(settings),
        Err(err) => {
            eprintln!("{err}");
            None
        }
    }
}

fn cmd_check_config(path: &std::path::Path) -> i32 {
    let Some(settings) = load(path) else {
        return exit_codes::INVALID_CONFIG;
    };
    match toml::to_string_pretty(&settings.config) {
        Ok(rendered) => {
            println!("{rendered}");
            exit_codes::OK
        }
        Err(err) => {
            eprintln!("render config: {err}");
            exit_codes::FAILED
        }
    }
}

async fn cmd_run(path: &std::path::Path, once: bool, summary_json: bool) -> i32 {
    let Some(Settings {
        config,
        credentials,
    }) = load(path)
    else {
        return exit_codes::INVALID_CONFIG;
    };

    let cancel = CancellationToken::new();
    tokio::spawn(stop_on_signal(cancel.clone()));

    let (content, oracle) = match build_gateways(&config, &credentials, &cancel) {
        Ok(gateways) => gateways,
        Err(err) => {
            error!(error = %format!("{err:#}"), "could not build gateways");
            return exit_codes::STARTUP_FAILED;
        }
    };

    let startup = async {
        wait_for_oracle(
            &oracle,
            config.oracle.probe_retries,
            Duration::from_secs(config.oracle.probe_delay_secs),
            &cancel,
        )
        .await?;
        verify_identity(&content).await
    };
    if let Err(err) = startup.await {
        error!(error = %format!("{err:#}"), "startup failed");
        return exit_codes::STARTUP_FAILED;
    }

    let agent = match Agent::new(config, content, oracle) {
        Ok(agent) => agent.with_cancellation(cancel),
        Err(err) => {
            eprintln!("{err:#}");
            return exit_codes::INVALID_CONFIG;
        }
    };
    let max_cycles = once.then_some(1);
    let handle = agent.spawn(max_cycles, move |summary| {
        if summary_json {
            print_summary(summary);
        }
    });

    match handle.join().await {
        Ok(outcome) => {
            info!(
                cycles = outcome.cycles_run,
                cancelled = outcome.stop == LoopStop::Cancelled,
                "exiting"
            );
            exit_codes::OK
        }
        Err(err) => {
            error!(error = %format!("{err:#}"), "agent loop failed");
            exit_codes::FAILED
        }
    }
}

fn build_gateways(
    config: &config::AgentConfig,
    credentials: &config::Credentials,
    cancel: &CancellationToken,
) -> Result<(HttpContentGateway, HttpOracleGateway)> {
    let content =
        HttpContentGateway::new(&config.content, credentials)?.with_cancellation(cancel.clone());
    let oracle = HttpOracleGateway::new(&config.oracle)?;
    Ok((content, oracle))
}

fn print_summary(summary: &CycleSummary) {
    if let Err(err) = write_summary(&mut std::io::stdout().lock(), summary) {
        warn!(error = %format!("{err:#}"), "could not print cycle summary");
    }
}

/// Write `summary` to `out` as one JSON line.
fn write_summary<W: Write>(out: &mut W, summary: &CycleSummary) -> Result<()> {
    let line = serde_json::to_string(summary).context("serialize cycle summary")?;
    writeln!(out, "{line}").context("write cycle summary")?;
    out.flush().context("flush cycle summary")?;
    Ok(())
}

/// Cancel `token` on SIGINT or SIGTERM.
async fn stop_on_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    info!("stop requested, finishing in-flight work");
    token.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn summary_is_one_json_line() {
        let mut out = Vec::new();
        write_summary(&mut out, &CycleSummary::new(3)).expect("write");
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.ends_with('\n'));
        assert_eq!(text.lines().count(), 1);
        let value: serde_json::Value = serde_json::from_str(&text).expect("json");
        assert_eq!(value["cycle"], 3);
    }

    #[test]
    fn write_failure_is_reported() {
        let err = write_summary(&mut ClosedPipe, &CycleSummary::new(1)).unwrap_err();
        assert!(format!("{err:#}").contains("write cycle summary"));
    }
}

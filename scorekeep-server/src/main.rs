//! # Scorekeep Server
//!
//! Entry point for the grading service: loads configuration, connects to
//! the broker in the background and serves the HTTP API until a shutdown
//! signal arrives or the broker connection cannot be established.

use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use scorekeep_core::{PolicySandbox, SandboxLimits, policy::verify_policy};
use scorekeep_server::{
    create_app,
    infra::{
        app_state::AppState,
        config::{Config, ConfigLoad, ConfigLoader, ConfigWarnings},
        startup::{ProdStartupHooks, StartupHooks},
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "scorekeep-server")]
#[command(about = "Scores raw grade submissions with user-authored policies")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(ClapArgs, Debug, Clone, Default)]
struct ServeArgs {
    /// Path to a scorekeep.toml configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Server port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Server host (overrides config)
    #[arg(long)]
    host: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load and validate configuration, print the effective values and exit
    CheckConfig,
    /// Compile a local policy file and run it against the validation probe
    VerifyPolicy {
        /// Policy source file
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Some(Command::CheckConfig) => run_check_config(&cli.serve),
        Some(Command::VerifyPolicy { file }) => {
            run_verify_policy(&cli.serve, &file).await
        }
        None => run_server(cli.serve).await,
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=warn,lapin=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_runtime_config(args: &ServeArgs) -> anyhow::Result<Config> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.with_config_path(path);
    }
    let ConfigLoad {
        mut config,
        warnings,
    } = loader.load().context("failed to load configuration")?;

    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = args.host.clone() {
        config.server.host = host;
    }

    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    log_warnings(&warnings);

    Ok(config)
}

fn log_warnings(warnings: &ConfigWarnings) {
    for warning in warnings.iter() {
        match &warning.hint {
            Some(hint) => {
                warn!(message = %warning.message, hint = %hint, "configuration warning")
            }
            None => {
                warn!(message = %warning.message, "configuration warning")
            }
        }
    }
}

fn run_check_config(args: &ServeArgs) -> anyhow::Result<ExitCode> {
    let config = load_runtime_config(args)?;
    for line in config.summary_lines() {
        println!("{line}");
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_verify_policy(
    args: &ServeArgs,
    file: &Path,
) -> anyhow::Result<ExitCode> {
    let config = load_runtime_config(args)?;
    let source = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;

    let sandbox = Arc::new(PolicySandbox::new(SandboxLimits {
        invoke_timeout: config.policy.invoke_timeout,
        max_operations: config.policy.max_operations,
        ..SandboxLimits::default()
    }));

    let verdict = tokio::task::spawn_blocking(move || {
        match sandbox.compile(&source) {
            Ok(policy) => verify_policy(&policy),
            Err(err) => scorekeep_model::ValidationResult::single(format!(
                "Invalid policy: {err}"
            )),
        }
    })
    .await
    .context("policy verification task failed")?;

    println!("{}", serde_json::to_string_pretty(&verdict)?);
    Ok(if verdict.overall_status {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn run_server(args: ServeArgs) -> anyhow::Result<ExitCode> {
    run_server_with_hooks(args, &ProdStartupHooks).await
}

async fn run_server_with_hooks<H>(
    args: ServeArgs,
    hooks: &H,
) -> anyhow::Result<ExitCode>
where
    H: StartupHooks,
{
    let config = load_runtime_config(&args)?;
    let host = config.server.host.clone();
    let port = config.server.port;

    let state =
        AppState::build(config).context("failed to initialise policy loader")?;
    hooks.run(&state).await?;

    let shutdown = state.lifecycle.shutdown_token();
    let router = create_app(state.clone());

    let listener = tokio::net::TcpListener::bind((host.as_str(), port))
        .await
        .with_context(|| format!("failed to bind {host}:{port}"))?;
    info!(
        addr = %listener.local_addr()?,
        base_path = %state.config.server.base_path,
        "Starting Scorekeep server"
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .context("server error")?;

    state.migrations.shutdown().await;
    if let Err(err) = state.broker.close().await {
        warn!(error = %err, "failed to close broker connection cleanly");
    }

    match state.lifecycle.fatal_reason() {
        Some(reason) => {
            error!(reason, "Scorekeep server stopped after a fatal error");
            Ok(ExitCode::FAILURE)
        }
        None => {
            info!("Scorekeep server stopped");
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn shutdown_signal(fatal: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(
            tokio::signal::unix::SignalKind::terminate(),
        ) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
        _ = fatal.cancelled() => {},
    }
}

#[cfg(test)]
mod tests {
    use super::{Cli, Command};
    use clap::Parser;
    use std::path::PathBuf;

    #[test]
    fn serve_flags_parse_without_subcommand() {
        let cli = Cli::try_parse_from([
            "scorekeep-server",
            "--config",
            "/etc/scorekeep.toml",
            "--port",
            "8080",
        ])
        .unwrap();

        assert!(cli.command.is_none());
        assert_eq!(cli.serve.port, Some(8080));
        assert_eq!(
            cli.serve.config,
            Some(PathBuf::from("/etc/scorekeep.toml"))
        );
    }

    #[test]
    fn verify_policy_takes_a_file() {
        let cli =
            Cli::try_parse_from(["scorekeep-server", "verify-policy", "late.rhai"])
                .unwrap();

        match cli.command {
            Some(Command::VerifyPolicy { file }) => {
                assert_eq!(file, PathBuf::from("late.rhai"))
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn check_config_accepts_global_config_flag() {
        let cli = Cli::try_parse_from([
            "scorekeep-server",
            "check-config",
            "--config",
            "other.toml",
        ])
        .unwrap();

        assert!(matches!(cli.command, Some(Command::CheckConfig)));
        assert_eq!(cli.serve.config, Some(PathBuf::from("other.toml")));
    }
}

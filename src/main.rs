use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use vita_gateway::api::ApiServer;
use vita_gateway::providers::HealthState;
use vita_gateway::speech::EngineState;
use vita_gateway::{AppContext, Config};

/// VITA - resilient AI and voice gateway for interview training
#[derive(Parser)]
#[command(name = "vita", version, about)]
struct Cli {
    /// Configuration file (defaults to the platform config dir)
    #[arg(short, long, env = "VITA_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on; overrides the configuration
    #[arg(long)]
    port: Option<u16>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP and WebSocket server (default)
    Serve,
    /// Probe speech engines and print their availability
    Engines,
    /// Probe chat providers and print their health
    Providers,
    /// Validate the configuration and exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,vita_gateway=info",
        1 => "info,vita_gateway=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Engines => engines(config).await,
        Command::Providers => providers(config).await,
        Command::CheckConfig => check_config(&config),
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let port = config.server.port;
    tracing::info!(
        port,
        providers = config.providers.len(),
        primary = ?config.primary,
        "starting vita gateway"
    );

    let ctx = Arc::new(AppContext::build(config)?);
    ctx.warm_up().await;
    let background = ctx.spawn_background();

    let server = ApiServer::new(Arc::clone(&ctx), port).spawn();
    tracing::info!("vita gateway ready");

    tokio::select! {
        result = server => {
            result??;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
        }
    }

    for handle in background {
        handle.abort();
    }
    Ok(())
}

async fn engines(config: Config) -> anyhow::Result<()> {
    let ctx = AppContext::build(config)?;
    let probed = ctx.engines.probe_all().await;

    println!("{:<24} {:<14} {:<12} {:<9} DETAIL", "ENGINE", "MODALITY", "KIND", "STATE");
    for descriptor in ctx.engines.descriptors() {
        let state = match descriptor.state {
            EngineState::Ready => "ready",
            EngineState::Degraded => "degraded",
            EngineState::Error => "error",
        };
        println!(
            "{:<24} {:<14} {:<12} {:<9} {}",
            descriptor.id,
            descriptor.modality.to_string(),
            format!("{:?}", descriptor.kind).to_lowercase(),
            state,
            descriptor.message.unwrap_or_default()
        );
    }
    println!(
        "\n{} engine(s), health score {:.2}",
        probed.len(),
        ctx.engines.health_score()
    );
    Ok(())
}

async fn providers(config: Config) -> anyhow::Result<()> {
    let ctx = AppContext::build(config)?;
    ctx.health.probe_all().await;
    let primary = ctx.selector.primary();

    println!("{:<12} {:<12} {:<14} {:<8} DETAIL", "PROVIDER", "STATE", "KEY FORMAT", "ROLE");
    for status in ctx.health.snapshot() {
        let role = if primary.as_deref() == Some(status.id.as_str()) {
            "primary"
        } else if ctx.selector.fallback_order().contains(&status.id) {
            "fallback"
        } else {
            "-"
        };
        println!(
            "{:<12} {:<12} {:<14} {:<8} {}",
            status.id,
            status.state.to_string(),
            format!("{:?}", status.credential_format).to_lowercase(),
            role,
            status.last_error.unwrap_or_default()
        );
    }

    let usable = ctx
        .health
        .snapshot()
        .iter()
        .filter(|s| s.state.is_usable())
        .count();
    if usable == 0 {
        anyhow::bail!("no provider is usable");
    }
    if ctx.health.state(primary.as_deref().unwrap_or_default()) != Some(HealthState::Healthy) {
        tracing::warn!(primary = ?primary, "primary provider is not healthy");
    }
    Ok(())
}

fn check_config(config: &Config) -> anyhow::Result<()> {
    config.validate()?;
    println!("configuration OK");
    println!("  port:      {}", config.server.port);
    println!(
        "  providers: {}",
        config
            .providers
            .iter()
            .map(|p| p.id.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("  primary:   {}", config.primary.as_deref().unwrap_or("-"));
    println!("  fallback:  {}", config.fallback_order.join(", "));
    println!(
        "  engines:   {} transcription, {} synthesis",
        config.engines.transcription.len(),
        config.engines.synthesis.len()
    );
    Ok(())
}

//! paramlink CLI
//!
//! ```bash
//! # Serve the control channel with built-in defaults
//! paramlink
//!
//! # Custom OSC host and a config file
//! paramlink --config paramlink.toml serve --osc-target 192.168.1.20:9000
//!
//! # Print the effective configuration
//! paramlink config
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::info;

use paramlink_core::config::{BridgeConfig, LogFormat};
use paramlink_core::emitter::{Emitter, MemoryEmitter};
use paramlink_core::error::format_error_with_remediation;
use paramlink_core::logging::init_logging;
use paramlink_core::osc::OscEmitter;
use paramlink_core::registry::ParameterRegistry;
use paramlink_core::server::{AppState, ServerConfig, run_server};
use paramlink_core::session::SessionSettings;

/// Throttled WebSocket to OSC parameter bridge
#[derive(Parser, Debug)]
#[command(name = "paramlink")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long, global = true, env = "PARAMLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log format (pretty or json)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the bridge (default if no subcommand)
    Serve(ServeArgs),

    /// Print the effective configuration as TOML
    Config(OverrideArgs),

    /// List the parameter table
    Params,
}

/// Flags that override the config file.
#[derive(Args, Debug, Default, Clone)]
struct OverrideArgs {
    /// Bind address
    #[arg(long)]
    host: Option<String>,

    /// Bind port
    #[arg(short, long)]
    port: Option<u16>,

    /// OSC destination as host:port
    #[arg(long)]
    osc_target: Option<String>,
}

impl OverrideArgs {
    /// Apply overrides, then re-validate the result.
    fn apply(&self, config: &mut BridgeConfig) -> paramlink_core::Result<()> {
        if let Some(host) = &self.host {
            config.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(target) = &self.osc_target {
            config.osc.target.clone_from(target);
        }
        config.validate()
    }
}

#[derive(Args, Debug, Default, Clone)]
struct ServeArgs {
    #[command(flatten)]
    overrides: OverrideArgs,

    /// Allow binding on a non-localhost address
    #[arg(long)]
    public: bool,

    /// Record updates in memory instead of sending OSC
    #[arg(long)]
    dry_run: bool,
}

fn load_config(cli: &Cli) -> paramlink_core::Result<BridgeConfig> {
    let mut config = match &cli.config {
        Some(path) => BridgeConfig::load(path)?,
        None => BridgeConfig::default(),
    };
    if let Some(level) = &cli.log_level {
        config.logging.level.clone_from(level);
    }
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }
    Ok(config)
}

async fn serve(config: BridgeConfig, args: &ServeArgs) -> paramlink_core::Result<()> {
    let registry = Arc::new(ParameterRegistry::from_definitions(
        &config.effective_parameters(),
    )?);

    let emitter: Arc<dyn Emitter> = if args.dry_run {
        info!("dry run: OSC output disabled");
        Arc::new(MemoryEmitter::new())
    } else {
        Arc::new(OscEmitter::bind(&config.osc.target)?)
    };

    let settings = SessionSettings::from_config(&config)?;
    info!(
        parameters = registry.len(),
        interval_ms = config.throttle.interval_ms,
        osc_target = %config.osc.target,
        "paramlink v{}",
        paramlink_core::VERSION
    );

    let state = Arc::new(AppState::new(registry, emitter, settings));
    let server = ServerConfig::new(config.server.port)
        .with_host(config.server.host.clone())
        .with_public_bind(args.public);
    run_server(server, state).await
}

fn exit_with(err: &paramlink_core::Error) -> ! {
    eprintln!("{}", format_error_with_remediation(err));
    std::process::exit(1);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = match load_config(&cli) {
        Ok(config) => config,
        Err(err) => exit_with(&err),
    };

    match cli.command.unwrap_or_else(|| Commands::Serve(ServeArgs::default())) {
        Commands::Config(overrides) => {
            if let Err(err) = overrides.apply(&mut config) {
                exit_with(&err);
            }
            let rendered = config.to_toml_string().unwrap_or_else(|e| exit_with(&e));
            print!("{rendered}");
        }
        Commands::Params => {
            for def in config.effective_parameters() {
                println!(
                    "{:<36} {:>10} [{}, {}]",
                    def.address, def.value, def.min, def.max
                );
            }
        }
        Commands::Serve(args) => {
            if let Err(err) = args.overrides.apply(&mut config) {
                exit_with(&err);
            }
            init_logging(&config.logging).context("failed to initialise logging")?;
            if let Err(err) = serve(config, &args).await {
                exit_with(&err);
            }
        }
    }
    Ok(())
}

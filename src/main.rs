use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use voxloop::bridge::{BridgeCommand, BridgeEvent, default_socket_path, follow, send_command};
use voxloop::cli::{Cli, Commands, ConfigAction};
use voxloop::config::Config;
use voxloop::diagnostics::{CheckResult, run_checks};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    voxloop::logging::init(cli.verbose, cli.quiet);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        None => run_conversation(cli.config.as_deref(), cli.run).await,
        Some(Commands::Run(args)) => run_conversation(cli.config.as_deref(), args).await,
        Some(Commands::Devices) => list_audio_devices(),
        Some(Commands::Check) => check(cli.config.as_deref()).await,
        Some(Commands::Follow { socket }) => handle_follow(socket).await,
        Some(Commands::Send { message, socket }) => handle_send(&message, socket).await,
        Some(Commands::Config { action }) => handle_config_command(action, cli.config.as_deref()),
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(shell, &mut Cli::command(), "voxloop", &mut std::io::stdout());
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config), which must exist
/// 2. Default config path (~/.config/voxloop/config.toml)
/// 3. Built-in defaults
///
/// Environment overrides apply on top of all three.
fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = match custom_path {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::load_or_default(&Config::default_path())?,
    };
    Ok(config.with_env_overrides())
}

async fn run_conversation(custom_path: Option<&Path>, args: voxloop::cli::RunArgs) -> Result<ExitCode> {
    let mut config = load_config(custom_path)?;
    args.apply(&mut config);
    tracing::info!(version = %voxloop::version_string(), "voxloop starting");
    voxloop::app::run(config).await?;
    Ok(ExitCode::SUCCESS)
}

#[cfg(feature = "cpal-audio")]
fn list_audio_devices() -> Result<ExitCode> {
    use voxloop::audio::capture::{Direction, list_devices};

    let inputs = list_devices(Direction::Input)?;
    let outputs = list_devices(Direction::Output)?;
    if inputs.is_empty() && outputs.is_empty() {
        eprintln!("No audio devices found");
        return Ok(ExitCode::FAILURE);
    }

    println!("Input devices:");
    for (idx, device) in inputs.iter().enumerate() {
        println!("  [{idx}] {device}");
    }
    println!("Output devices:");
    for (idx, device) in outputs.iter().enumerate() {
        println!("  [{idx}] {device}");
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(not(feature = "cpal-audio"))]
fn list_audio_devices() -> Result<ExitCode> {
    eprintln!("voxloop was built without audio device support (feature `cpal-audio`)");
    Ok(ExitCode::FAILURE)
}

async fn check(custom_path: Option<&Path>) -> Result<ExitCode> {
    let config = load_config(custom_path)?;
    let synth = voxloop::app::build_synthesizer(&config, tokio::runtime::Handle::current())?;
    let checks = tokio::task::spawn_blocking(move || run_checks(&config, synth.as_ref())).await?;

    let mut failed = false;
    for check in &checks {
        match &check.result {
            CheckResult::Ok(detail) => {
                println!("{} {:<17} {}", "✓".green(), check.name, detail);
            }
            CheckResult::Warning(detail) => {
                println!("{} {:<17} {}", "⚠".yellow(), check.name, detail.yellow());
            }
            CheckResult::NotFound(detail) => {
                failed = true;
                println!("{} {:<17} {}", "✗".red(), check.name, detail.red());
            }
        }
    }
    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

async fn handle_follow(socket: Option<PathBuf>) -> Result<ExitCode> {
    let socket_path = socket.unwrap_or_else(default_socket_path);
    eprintln!("Following {} (Ctrl+C to stop)", socket_path.display());

    let followed = follow(&socket_path, |event| match event {
        BridgeEvent::Ready => println!("{}", event.green()),
        BridgeEvent::Restart => println!("{}", event.yellow()),
        BridgeEvent::Deleted(_) => println!("{event}"),
        BridgeEvent::Interrupted(_) => println!("{}", event.red()),
    })
    .await;

    match followed {
        Ok(()) => {
            eprintln!("Connection closed");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("{}", format!("Failed to follow bridge: {e}").red());
            eprintln!("Is voxloop running? Start it with: voxloop run");
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn handle_send(message: &str, socket: Option<PathBuf>) -> Result<ExitCode> {
    let command: BridgeCommand = message.parse().map_err(|e: String| anyhow::anyhow!(e))?;
    let socket_path = socket.unwrap_or_else(default_socket_path);
    match send_command(&socket_path, command).await {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e) => {
            eprintln!("{}", format!("Failed to send {command}: {e}").red());
            Ok(ExitCode::FAILURE)
        }
    }
}

fn handle_config_command(action: ConfigAction, custom_path: Option<&Path>) -> Result<ExitCode> {
    match action {
        ConfigAction::Show => {
            let config = load_config(custom_path)?;
            print!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigAction::Path => {
            let path = custom_path
                .map(PathBuf::from)
                .unwrap_or_else(Config::default_path);
            println!("{}", path.display());
        }
    }
    Ok(ExitCode::SUCCESS)
}

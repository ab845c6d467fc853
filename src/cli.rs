//! Command-line interface for voxloop
//!
//! Provides argument parsing using clap derive macros.

use crate::config::Config;
use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

/// Talk to a language model, hands free
#[derive(Parser, Debug)]
#[command(
    name = "voxloop",
    version,
    about = "Talk to a language model, hands free",
    args_conflicts_with_subcommands = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose logging (-v: pipeline debug, -vv: everything, -vvv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(flatten)]
    pub run: RunArgs,
}

/// Overrides for `voxloop run`.
#[derive(Args, Debug, Default, Clone)]
pub struct RunArgs {
    /// Audio input device
    #[arg(long, value_name = "DEVICE")]
    pub device: Option<String>,

    /// Read utterances as WAV files from this directory instead of the microphone
    #[arg(long, value_name = "DIR")]
    pub inbox: Option<PathBuf>,

    /// Language code for transcription (e.g. ja, en)
    #[arg(long, value_name = "LANG")]
    pub language: Option<String>,

    /// Ask for an emotion preamble and speak only the labelled reply
    #[arg(long)]
    pub emotion: bool,

    /// Pause between spoken sentences. Examples: 500ms, 1s
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub gap: Option<Duration>,

    /// Interrupt playback as soon as speech starts, before transcription
    #[arg(long)]
    pub barge_in_on_speech: bool,

    /// Bridge socket path (default: $XDG_RUNTIME_DIR/voxloop.sock)
    #[arg(long, value_name = "PATH")]
    pub socket: Option<PathBuf>,

    /// Do not open the bridge socket
    #[arg(long)]
    pub no_bridge: bool,
}

impl RunArgs {
    /// Applies the flags on top of the file and environment config.
    pub fn apply(self, config: &mut Config) {
        if let Some(device) = self.device {
            config.audio.device = Some(device);
        }
        if let Some(inbox) = self.inbox {
            config.audio.inbox_dir = Some(inbox);
        }
        if let Some(language) = self.language {
            config.stt.language = language;
        }
        if self.emotion {
            config.reply.emotion = true;
        }
        if let Some(gap) = self.gap {
            config.playback.gap_ms = gap.as_millis() as u64;
        }
        if self.barge_in_on_speech {
            config.audio.barge_in_on_speech_start = true;
        }
        if let Some(socket) = self.socket {
            config.bridge.socket = Some(socket);
        }
        if self.no_bridge {
            config.bridge.enabled = false;
        }
    }
}

/// Parse a duration; bare numbers are milliseconds.
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Ok(ms) = s.parse::<u64>() {
        return Ok(Duration::from_millis(ms));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the conversation loop (default)
    Run(RunArgs),

    /// List audio devices
    Devices,

    /// Check configuration and backends
    Check,

    /// Print bridge events as they happen
    Follow {
        /// Bridge socket path (default: $XDG_RUNTIME_DIR/voxloop.sock)
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// Send a bridge command: exit, speech_start or a segment id
    Send {
        message: String,

        /// Bridge socket path (default: $XDG_RUNTIME_DIR/voxloop.sock)
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// View configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file path
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_no_subcommand_means_run() {
        let cli = Cli::try_parse_from(["voxloop"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["voxloop", "check", "-vv", "--config", "/tmp/v.toml"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Check)));
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/v.toml")));
    }

    #[test]
    fn test_send_takes_message() {
        let cli = Cli::try_parse_from(["voxloop", "send", "exit"]).unwrap();
        match cli.command {
            Some(Commands::Send { message, socket }) => {
                assert_eq!(message, "exit");
                assert!(socket.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("250").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("1s").unwrap(), Duration::from_secs(1));
        assert_eq!(parse_duration("1s 500ms").unwrap(), Duration::from_millis(1500));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn test_run_args_override_config() {
        let cli = Cli::try_parse_from([
            "voxloop",
            "--inbox",
            "/tmp/inbox",
            "--emotion",
            "--gap",
            "200ms",
            "--no-bridge",
            "--language",
            "en",
        ])
        .unwrap();
        let mut config = Config::default();
        cli.run.apply(&mut config);

        assert_eq!(config.audio.inbox_dir, Some(PathBuf::from("/tmp/inbox")));
        assert!(config.reply.emotion);
        assert_eq!(config.playback.gap_ms, 200);
        assert!(!config.bridge.enabled);
        assert_eq!(config.stt.language, "en");
    }

    #[test]
    fn test_run_subcommand_takes_same_flags() {
        let cli = Cli::try_parse_from(["voxloop", "run", "--device", "hw:1"]).unwrap();
        match cli.command {
            Some(Commands::Run(args)) => assert_eq!(args.device.as_deref(), Some("hw:1")),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_empty_run_args_leave_config_alone() {
        let mut config = Config::default();
        RunArgs::default().apply(&mut config);
        assert_eq!(config, Config::default());
    }
}

//! Startup diagnostics for `voxloop check`.
//!
//! Each check inspects one configured backend or resource without starting
//! the pipeline.

use crate::config::{Config, SttBackend};
use crate::tts::SpeechSynthesizer;
use std::fs;
use std::path::Path;

/// Result of a single check.
#[derive(Debug, PartialEq)]
pub enum CheckResult {
    Ok(String),
    NotFound(String),
    /// Usable, but something looks off.
    Warning(String),
}

impl CheckResult {
    pub fn is_failure(&self) -> bool {
        matches!(self, CheckResult::NotFound(_))
    }
}

/// A named check and its outcome.
#[derive(Debug)]
pub struct Check {
    pub name: &'static str,
    pub result: CheckResult,
}

fn check_config(config: &Config) -> CheckResult {
    match config.validate() {
        Ok(()) => CheckResult::Ok("valid".to_string()),
        Err(e) => CheckResult::NotFound(e.to_string()),
    }
}

fn check_work_dir(dir: &Path) -> CheckResult {
    if let Err(e) = fs::create_dir_all(dir) {
        return CheckResult::NotFound(format!("cannot create {}: {e}", dir.display()));
    }
    let marker = dir.join(".voxloop-check");
    match fs::write(&marker, b"") {
        Ok(()) => {
            fs::remove_file(&marker).ok();
            CheckResult::Ok(dir.display().to_string())
        }
        Err(e) => CheckResult::NotFound(format!("{} is not writable: {e}", dir.display())),
    }
}

fn check_env_key(var: &str) -> CheckResult {
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => CheckResult::Ok(format!("${var} is set")),
        Ok(_) => CheckResult::NotFound(format!("${var} is empty")),
        Err(_) => CheckResult::NotFound(format!("${var} is not set")),
    }
}

fn check_stt(config: &Config) -> CheckResult {
    match config.stt.backend {
        SttBackend::Http => {
            if let Err(e) = reqwest::Url::parse(&config.stt.endpoint) {
                return CheckResult::NotFound(format!("invalid endpoint {}: {e}", config.stt.endpoint));
            }
            if let Some(var) = &config.stt.api_key_env
                && std::env::var(var).is_err()
            {
                return CheckResult::Warning(format!(
                    "{} (model {}), but ${var} is not set",
                    config.stt.endpoint, config.stt.model
                ));
            }
            CheckResult::Ok(format!("{} (model {})", config.stt.endpoint, config.stt.model))
        }
        SttBackend::Whisper => {
            let path = Path::new(&config.stt.model);
            if !path.exists() {
                return CheckResult::NotFound(format!("model file {} missing", path.display()));
            }
            if cfg!(feature = "whisper") {
                CheckResult::Ok(path.display().to_string())
            } else {
                CheckResult::Warning("built without the `whisper` feature".to_string())
            }
        }
    }
}

fn check_tts(synth: &dyn SpeechSynthesizer, endpoint: &str) -> CheckResult {
    if synth.is_ready() {
        CheckResult::Ok(format!("{} at {endpoint}", synth.name()))
    } else {
        CheckResult::NotFound(format!("{} not answering at {endpoint}", synth.name()))
    }
}

fn check_input(config: &Config) -> CheckResult {
    if let Some(inbox) = &config.audio.inbox_dir {
        return if inbox.is_dir() {
            CheckResult::Ok(format!("inbox {}", inbox.display()))
        } else {
            CheckResult::Warning(format!("inbox {} does not exist yet", inbox.display()))
        };
    }
    #[cfg(feature = "cpal-audio")]
    {
        use crate::audio::capture::{Direction, list_devices};
        match list_devices(Direction::Input) {
            Ok(devices) if devices.is_empty() => {
                CheckResult::NotFound("no input devices".to_string())
            }
            Ok(devices) => CheckResult::Ok(format!("{} input device(s)", devices.len())),
            Err(e) => CheckResult::NotFound(e.to_string()),
        }
    }
    #[cfg(not(feature = "cpal-audio"))]
    {
        CheckResult::NotFound(
            "built without the `cpal-audio` feature; set audio.inbox_dir".to_string(),
        )
    }
}

/// Runs every check. Blocks on network checks, so call it off the runtime.
pub fn run_checks(config: &Config, synth: &dyn SpeechSynthesizer) -> Vec<Check> {
    vec![
        Check {
            name: "config",
            result: check_config(config),
        },
        Check {
            name: "work dir",
            result: check_work_dir(&config.pipeline.work_dir),
        },
        Check {
            name: "audio input",
            result: check_input(config),
        },
        Check {
            name: "speech-to-text",
            result: check_stt(config),
        },
        Check {
            name: "language model",
            result: check_env_key(&config.llm.api_key_env),
        },
        Check {
            name: "speech synthesis",
            result: check_tts(synth, config.tts.endpoint_or_default()),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tts::MockSynthesizer;
    use tempfile::TempDir;

    #[test]
    fn test_work_dir_is_created_and_writable() {
        let dir = TempDir::new().unwrap();
        let work = dir.path().join("Tmp");
        assert!(matches!(check_work_dir(&work), CheckResult::Ok(_)));
        assert!(work.is_dir());
        assert_eq!(fs::read_dir(&work).unwrap().count(), 0);
    }

    #[test]
    fn test_missing_whisper_model() {
        let mut config = Config::default();
        config.stt.backend = SttBackend::Whisper;
        config.stt.model = "/nonexistent/ggml-base.bin".to_string();
        assert!(check_stt(&config).is_failure());
    }

    #[test]
    fn test_invalid_stt_endpoint() {
        let mut config = Config::default();
        config.stt.endpoint = "not a url".to_string();
        assert!(check_stt(&config).is_failure());
    }

    #[test]
    fn test_unset_env_key() {
        assert!(check_env_key("VOXLOOP_TEST_KEY_THAT_IS_NEVER_SET").is_failure());
    }

    #[test]
    fn test_tts_readiness() {
        let ready = MockSynthesizer::new();
        assert!(matches!(check_tts(&ready, "http://x"), CheckResult::Ok(_)));

        let down = MockSynthesizer::new().with_ready_after(usize::MAX);
        assert!(check_tts(&down, "http://x").is_failure());
    }

    #[test]
    fn test_inbox_input() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.audio.inbox_dir = Some(dir.path().to_path_buf());
        assert!(matches!(check_input(&config), CheckResult::Ok(_)));

        config.audio.inbox_dir = Some(dir.path().join("missing"));
        assert!(matches!(check_input(&config), CheckResult::Warning(_)));
    }

    #[test]
    fn test_run_checks_covers_every_concern() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.pipeline.work_dir = dir.path().join("Tmp");
        let names: Vec<&str> = run_checks(&config, &MockSynthesizer::new())
            .iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "config",
                "work dir",
                "audio input",
                "speech-to-text",
                "language model",
                "speech synthesis"
            ]
        );
    }
}

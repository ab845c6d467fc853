//! Composition root: builds the configured backends and runs the pipeline
//! until the process is told to stop.

use crate::audio::playback::AudioOutput;
use crate::audio::utterance::{CaptureConfig, InboxUtteranceSource, UtteranceSource};
use crate::bridge::{BridgeServer, ControlHandler, Notifier, default_socket_path};
use crate::config::{Config, SttBackend, TtsBackend};
use crate::conversation::{Conversation, ConversationEngine, ReplyPolicy};
use crate::defaults;
use crate::error::{Result, VoxError};
use crate::llm::LanguageModel;
use crate::llm::gemini::GeminiModel;
use crate::pipeline::{Pipeline, PipelineConfig, Services};
use crate::stt::{HttpSpeechToText, SpeechToText};
use crate::tts::style_bert_vits2::VoiceParams;
use crate::tts::{SpeechSynthesizer, StyleBertVits2, Voicevox};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

/// Picks the reply format from `[reply]`.
pub fn reply_policy(config: &Config) -> ReplyPolicy {
    if config.reply.emotion {
        ReplyPolicy::Structured {
            label: config.reply.label.clone(),
        }
    } else {
        ReplyPolicy::Plain
    }
}

/// Builds the conversation engine from `[llm]` and `[reply]`.
pub fn build_engine(config: &Config, model: Arc<dyn LanguageModel>) -> ConversationEngine {
    let policy = reply_policy(config);
    let instructions = defaults::STRUCTURED_PROMPT.replace(defaults::REPLY_LABEL, &config.reply.label);
    let system_prompt = policy.system_prompt(&config.llm.system_prompt, &instructions);
    let conversation = Conversation::new(&system_prompt, defaults::TEMPLATE_ACK)
        .with_limits(config.llm.max_turns, config.llm.keep_recent)
        .with_placeholder(config.reply.placeholder.clone());
    ConversationEngine::new(conversation, policy, model)
        .with_max_format_retries(config.reply.max_format_retries)
        .with_fallback(config.reply.fallback.clone())
}

pub fn build_speech_to_text(config: &Config, runtime: Handle) -> Result<Arc<dyn SpeechToText>> {
    match config.stt.backend {
        SttBackend::Http => Ok(Arc::new(HttpSpeechToText::new(
            &config.stt.endpoint,
            &config.stt.model,
            config.stt.api_key_env.as_deref(),
            runtime,
        )?)),
        #[cfg(feature = "whisper")]
        SttBackend::Whisper => Ok(Arc::new(crate::stt::WhisperSpeechToText::new(
            &config.stt.model,
        )?)),
        #[cfg(not(feature = "whisper"))]
        SttBackend::Whisper => Err(VoxError::ConfigInvalidValue {
            key: "stt.backend".to_string(),
            message: "whisper support not compiled in (enable the `whisper` feature)".to_string(),
        }),
    }
}

pub fn build_language_model(config: &Config, runtime: Handle) -> Result<Arc<dyn LanguageModel>> {
    Ok(Arc::new(GeminiModel::new(
        &config.llm.endpoint,
        &config.llm.model,
        &config.llm.api_key_env,
        runtime,
    )?))
}

pub fn build_synthesizer(config: &Config, runtime: Handle) -> Result<Arc<dyn SpeechSynthesizer>> {
    let endpoint = config.tts.endpoint_or_default();
    match config.tts.backend {
        TtsBackend::StyleBertVits2 => Ok(Arc::new(StyleBertVits2::new(
            endpoint,
            VoiceParams::from(&config.tts),
            runtime,
        )?)),
        TtsBackend::Voicevox => Ok(Arc::new(Voicevox::new(
            endpoint,
            config.tts.speaker_id,
            runtime,
        )?)),
    }
}

pub fn build_output(config: &Config) -> Result<Arc<dyn AudioOutput>> {
    #[cfg(feature = "cpal-audio")]
    {
        Ok(Arc::new(crate::audio::playback::CpalOutput::new(
            config.playback.device.as_deref(),
        )?))
    }
    #[cfg(not(feature = "cpal-audio"))]
    {
        let _ = config;
        Err(VoxError::AudioPlayback {
            message: "audio support not compiled in (enable the `cpal-audio` feature)".to_string(),
        })
    }
}

pub fn capture_config(config: &Config) -> CaptureConfig {
    CaptureConfig {
        sample_rate: config.audio.sample_rate,
        vad_threshold: config.audio.vad_threshold,
        silence_duration_ms: config.audio.silence_duration_ms,
        listen_timeout: Duration::from_millis(config.audio.listen_timeout_ms),
        phrase_limit: Duration::from_millis(config.audio.phrase_limit_ms),
        pre_speech: Duration::from_millis(u64::from(config.audio.pre_speech_ms)),
        ambient_calibration: Duration::from_millis(u64::from(config.audio.ambient_calibration_ms)),
        ambient_ratio: config.audio.ambient_ratio,
    }
}

/// Microphone capture, or the inbox directory when `audio.inbox_dir` is set.
pub fn build_source(config: &Config) -> Result<Box<dyn UtteranceSource>> {
    let work_dir = &config.pipeline.work_dir;
    if let Some(inbox) = &config.audio.inbox_dir {
        std::fs::create_dir_all(inbox)?;
        tracing::info!(inbox = %inbox.display(), "reading utterances from inbox");
        return Ok(Box::new(
            InboxUtteranceSource::new(inbox, work_dir)
                .with_listen_timeout(Duration::from_millis(config.audio.listen_timeout_ms)),
        ));
    }

    #[cfg(feature = "cpal-audio")]
    {
        use crate::audio::capture::CpalAudioSource;
        use crate::audio::utterance::VadUtteranceSource;
        let source = CpalAudioSource::new(config.audio.device.as_deref())?;
        Ok(Box::new(VadUtteranceSource::new(
            source,
            capture_config(config),
            work_dir,
        )))
    }
    #[cfg(not(feature = "cpal-audio"))]
    {
        Err(VoxError::AudioCapture {
            message: "no microphone support compiled in; set audio.inbox_dir or enable `cpal-audio`"
                .to_string(),
        })
    }
}

/// Runs the conversation loop until SIGINT or SIGTERM.
pub async fn run(config: Config) -> Result<()> {
    config.validate()?;
    let runtime = Handle::current();

    let services = Services {
        stt: build_speech_to_text(&config, runtime.clone())?,
        engine: build_engine(&config, build_language_model(&config, runtime.clone())?),
        synth: build_synthesizer(&config, runtime.clone())?,
        output: build_output(&config)?,
    };
    let source = build_source(&config)?;

    let (notifier, notifications) = if config.bridge.enabled {
        let (notifier, rx) = Notifier::channel(config.pipeline.notify_capacity.max(1));
        (notifier, Some(rx))
    } else {
        (Notifier::disabled(), None)
    };

    let pipeline = Pipeline::new(PipelineConfig::from(&config)).with_notifier(notifier);
    tracing::info!(
        backend = services.synth.name(),
        "starting pipeline, waiting for speech synthesis backend"
    );
    let handle = tokio::task::spawn_blocking(move || pipeline.start(source, services))
        .await
        .map_err(|e| VoxError::Other(format!("pipeline startup task failed: {e}")))??;

    let bridge = match notifications {
        Some(rx) => {
            let socket = config.bridge.socket.clone().unwrap_or_else(default_socket_path);
            let server = Arc::new(BridgeServer::new(socket));
            server.forward(rx)?;
            let serving = Arc::clone(&server);
            let handler = ControlHandler::new(handle.control());
            tokio::spawn(async move {
                if let Err(e) = serving.start(handler).await {
                    tracing::error!("bridge server failed: {e}");
                }
            });
            Some(server)
        }
        None => None,
    };

    tracing::info!("listening, press Ctrl+C to stop");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received SIGINT, shutting down");
        }
        res = wait_for_sigterm() => {
            if let Err(e) = res {
                tracing::error!("error setting up signal handler: {e}");
            }
            tracing::info!("received SIGTERM, shutting down");
        }
    }

    let clean = tokio::task::spawn_blocking(move || handle.stop())
        .await
        .map_err(|e| VoxError::Other(format!("pipeline shutdown task failed: {e}")))?;
    if !clean {
        tracing::warn!("some pipeline threads did not stop in time");
    }
    if let Some(server) = bridge {
        server.stop()?;
    }
    Ok(())
}

#[cfg(unix)]
async fn wait_for_sigterm() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| VoxError::Other(format!("failed to register SIGTERM handler: {e}")))?;
    sigterm.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_sigterm() -> Result<()> {
    std::future::pending::<()>().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Role;
    use crate::llm::MockLanguageModel;
    use tempfile::TempDir;

    #[test]
    fn test_plain_engine_uses_base_prompt() {
        let config = Config::default();
        let engine = build_engine(&config, Arc::new(MockLanguageModel::new()));
        assert_eq!(engine.policy(), &ReplyPolicy::Plain);

        let template = engine.conversation().template();
        assert_eq!(template[0].role, Role::System);
        assert_eq!(template[0].content, config.llm.system_prompt);
        assert_eq!(template[1].content, defaults::TEMPLATE_ACK);
    }

    #[test]
    fn test_emotion_mode_names_the_configured_label() {
        let mut config = Config::default();
        config.reply.emotion = true;
        config.reply.label = "[reply]".to_string();
        let engine = build_engine(&config, Arc::new(MockLanguageModel::new()));

        assert_eq!(
            engine.policy(),
            &ReplyPolicy::Structured {
                label: "[reply]".to_string()
            }
        );
        let prompt = &engine.conversation().template()[0].content;
        assert!(prompt.starts_with(&config.llm.system_prompt));
        assert!(prompt.contains("[reply]"));
        assert!(!prompt.contains(defaults::REPLY_LABEL));
    }

    #[test]
    fn test_capture_config_follows_audio_section() {
        let mut config = Config::default();
        config.audio.phrase_limit_ms = 3000;
        config.audio.pre_speech_ms = 200;
        config.audio.ambient_calibration_ms = 0;
        let capture = capture_config(&config);
        assert_eq!(capture.phrase_limit, Duration::from_secs(3));
        assert_eq!(capture.pre_speech, Duration::from_millis(200));
        assert_eq!(capture.ambient_calibration, Duration::ZERO);
        assert_eq!(capture.ambient_ratio, defaults::AMBIENT_RATIO);
    }

    #[test]
    fn test_inbox_source_is_created() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.audio.inbox_dir = Some(dir.path().join("inbox"));
        config.pipeline.work_dir = dir.path().join("Tmp");

        assert!(build_source(&config).is_ok());
        assert!(dir.path().join("inbox").is_dir());
    }

    #[tokio::test]
    async fn test_synthesizer_follows_backend() {
        let mut config = Config::default();
        let synth = build_synthesizer(&config, Handle::current()).unwrap();
        assert_eq!(synth.name(), "style-bert-vits2");

        config.tts.backend = TtsBackend::Voicevox;
        let synth = build_synthesizer(&config, Handle::current()).unwrap();
        assert_eq!(synth.name(), "voicevox");
    }

    #[cfg(not(feature = "whisper"))]
    #[tokio::test]
    async fn test_whisper_backend_needs_feature() {
        let mut config = Config::default();
        config.stt.backend = SttBackend::Whisper;
        assert!(matches!(
            build_speech_to_text(&config, Handle::current()),
            Err(VoxError::ConfigInvalidValue { .. })
        ));
    }
}

//! Default configuration constants for voxloop.
//!
//! Shared by the config layer and by the components that can be built
//! without a config file (tests, `check`).

/// Default audio sample rate in Hz.
///
/// 16kHz is what the speech-to-text backends expect; captured audio is
/// resampled to this rate before it is written to an utterance file.
pub const SAMPLE_RATE: u32 = 16000;

/// Default RMS threshold (0.0 to 1.0) above which a frame counts as speech.
pub const VAD_THRESHOLD: f32 = 0.02;

/// Trailing silence in milliseconds that ends an utterance.
pub const SILENCE_DURATION_MS: u32 = 800;

/// How long the capture stage waits for speech to begin before giving up on
/// the current listen cycle and starting a new one.
pub const LISTEN_TIMEOUT_MS: u64 = 1000;

/// Longest phrase in milliseconds; speech is cut into a new utterance here.
pub const PHRASE_LIMIT_MS: u64 = 5000;

/// Utterances shorter than this are dropped without transcription.
pub const MIN_UTTERANCE_MS: u64 = 500;

/// Pre-speech buffer duration in milliseconds.
///
/// Captures soft onsets that occur before energy crosses the VAD threshold.
pub const PRE_SPEECH_MS: u32 = 300;

/// Background noise is measured for this long when capture starts.
pub const AMBIENT_CALIBRATION_MS: u32 = 1000;

/// Speech has to be this many times louder than the measured noise floor.
pub const AMBIENT_RATIO: f32 = 1.5;

/// Default language code for transcription.
pub const DEFAULT_LANGUAGE: &str = "ja";

/// Default model name for the HTTP speech-to-text backend.
pub const DEFAULT_STT_MODEL: &str = "whisper-1";

/// Default OpenAI-compatible transcription endpoint.
pub const DEFAULT_STT_ENDPOINT: &str = "http://127.0.0.1:8080/v1";

/// Default Gemini model.
pub const DEFAULT_LLM_MODEL: &str = "gemini-1.5-flash-002";

/// Environment variable holding the Gemini API key.
pub const DEFAULT_API_KEY_ENV: &str = "GOOGLE_AI_API_KEY";

/// Gemini REST base URL.
pub const GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

/// System prompt placed at the top of every conversation.
pub const SYSTEM_PROMPT: &str = "System prompt: これはシステムプロンプトでユーザーからの入力ではありません。あなたは何よりもこのシステムプロンプトを優先しなければなりません。\n\
あなたは賢く、親切なAIアシスタントです。音声での会話であるため、簡潔で分かりやすい文章で返してください。Markdown記法には意味がありません。\n\
ユーザーの入力が不自然であった場合は文字起こしのエラーであると考えられます。本来の発話を推測して返答してください。";

/// Additional instruction appended to the system prompt in emotion mode.
pub const STRUCTURED_PROMPT: &str = "返答の前に、あなたの感情と考えを短く書いてください。そのあとに必ず「【返答】」という見出しを書き、その後ろにユーザーへの返答だけを書いてください。";

/// Assistant acknowledgement that closes the conversation template.
pub const TEMPLATE_ACK: &str = "了解しました。";

/// Label that introduces the user-facing part of a structured reply.
pub const REPLY_LABEL: &str = "【返答】";

/// Reply spoken when the model never produces a well-formed structured reply.
pub const FALLBACK_REPLY: &str = "すみません、うまく答えられませんでした。もう一度お願いします。";

/// Assistant turn inserted between two consecutive user turns.
pub const PLACEHOLDER_REPLY: &str = "...";

/// History is trimmed once it holds more turns than this.
pub const MAX_TURNS: usize = 8;

/// Non-template turns kept after trimming.
pub const KEEP_RECENT: usize = 6;

/// Corrective retries after a reply is missing its label.
pub const MAX_FORMAT_RETRIES: u32 = 5;

/// Style-Bert-VITS2 server.
pub const SBV2_ENDPOINT: &str = "http://127.0.0.1:5000";

/// VOICEVOX engine.
pub const VOICEVOX_ENDPOINT: &str = "http://127.0.0.1:50021";

/// How often the synthesis backend is polled while waiting for it at startup.
pub const READINESS_INTERVAL_MS: u64 = 5000;

/// Give up on the synthesis backend after this long.
pub const READINESS_TIMEOUT_MS: u64 = 300_000;

/// Pause between consecutive segments during playback.
pub const PLAYBACK_GAP_MS: u64 = 500;

/// Directory (relative to the working directory) for transient audio files.
pub const WORK_DIR: &str = "Tmp";

/// Capacity of the inter-stage queues.
pub const QUEUE_CAPACITY: usize = 64;

/// Capacity of the outbound notification queue.
pub const NOTIFY_CAPACITY: usize = 256;

/// Timeout for a single backend HTTP request in seconds.
pub const HTTP_TIMEOUT_SECS: u64 = 60;

//! One conversation cycle: fold user input into history, ask the model,
//! extract the spoken reply.

use crate::conversation::policy::{ExtractError, ReplyPolicy, strip_emoji};
use crate::conversation::turn::Conversation;
use crate::defaults;
use crate::error::VoxError;
use crate::llm::LanguageModel;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConverseError {
    #[error("no user input to answer")]
    NoInput,
    #[error("model call failed: {0}")]
    ModelFailure(#[source] VoxError),
}

/// Outcome of a successful cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyOutcome {
    /// Text to speak.
    pub spoken: String,
    /// Corrective retries spent on this reply.
    pub retries: u32,
    /// True when retries ran out and the fallback was used.
    pub fell_back: bool,
}

/// Progress of one cycle through the format contract.
#[derive(Debug)]
enum Attempt {
    Pending,
    Extracting { raw: String, retries: u32 },
    RetryPending { retries: u32 },
    Success { raw: String, spoken: String, retries: u32 },
    Exhausted { retries: u32 },
}

/// Where the attempt machine came to rest.
#[derive(Debug)]
enum Settled {
    Success { raw: String, spoken: String, retries: u32 },
    Exhausted { retries: u32 },
}

pub struct ConversationEngine {
    conversation: Conversation,
    policy: ReplyPolicy,
    model: Arc<dyn LanguageModel>,
    max_format_retries: u32,
    fallback: String,
}

impl ConversationEngine {
    pub fn new(conversation: Conversation, policy: ReplyPolicy, model: Arc<dyn LanguageModel>) -> Self {
        Self {
            conversation,
            policy,
            model,
            max_format_retries: defaults::MAX_FORMAT_RETRIES,
            fallback: defaults::FALLBACK_REPLY.to_string(),
        }
    }

    pub fn with_max_format_retries(mut self, retries: u32) -> Self {
        self.max_format_retries = retries;
        self
    }

    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = fallback.into();
        self
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn policy(&self) -> &ReplyPolicy {
        &self.policy
    }

    /// Forgets everything said after the template.
    pub fn reset(&mut self) {
        self.conversation.reset();
    }

    /// Adds `inputs` to history and produces exactly one assistant turn.
    ///
    /// On a model failure nothing is appended; the user turns stay in
    /// history and are answered together with the next input.
    pub fn step<I, S>(&mut self, inputs: I) -> Result<ReplyOutcome, ConverseError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut received = false;
        for input in inputs {
            self.conversation.push_user(input);
            received = true;
        }
        if !received {
            return Err(ConverseError::NoInput);
        }
        if self.conversation.trim() {
            tracing::debug!(turns = self.conversation.len(), "trimmed conversation history");
        }

        let original = self
            .conversation
            .last()
            .map(|t| t.content.clone())
            .unwrap_or_default();

        let result = self.run_attempts(&original);

        // A corrective retry rewrote the user's words; put them back.
        if let Some(turn) = self.conversation.pending_user_mut() {
            turn.content = original;
        }

        let outcome = match result? {
            Settled::Success {
                raw,
                spoken,
                retries,
            } => {
                let stored = strip_emoji(&raw);
                self.conversation.push_assistant(stored.trim());
                ReplyOutcome {
                    spoken: strip_emoji(&spoken).trim().to_string(),
                    retries,
                    fell_back: false,
                }
            }
            Settled::Exhausted { retries } => {
                tracing::warn!(retries, "reply format retries exhausted, using fallback");
                self.conversation.push_assistant(self.fallback.clone());
                ReplyOutcome {
                    spoken: self.fallback.clone(),
                    retries,
                    fell_back: true,
                }
            }
        };
        Ok(outcome)
    }

    /// Drives the attempt state machine until it settles.
    fn run_attempts(&mut self, original: &str) -> Result<Settled, ConverseError> {
        let mut state = Attempt::Pending;
        loop {
            state = match state {
                Attempt::Pending => Attempt::Extracting {
                    raw: self.call_model()?,
                    retries: 0,
                },
                Attempt::Extracting { raw, retries } => match self.policy.extract(&raw) {
                    Ok(spoken) => Attempt::Success {
                        raw,
                        spoken,
                        retries,
                    },
                    Err(e) => {
                        self.log_extract_failure(&e, &raw, retries);
                        if retries < self.max_format_retries {
                            Attempt::RetryPending {
                                retries: retries + 1,
                            }
                        } else {
                            Attempt::Exhausted { retries }
                        }
                    }
                },
                Attempt::RetryPending { retries } => {
                    let corrective = self.policy.corrective_prompt(original);
                    if let Some(turn) = self.conversation.pending_user_mut() {
                        turn.content = corrective;
                    }
                    Attempt::Extracting {
                        raw: self.call_model()?,
                        retries,
                    }
                }
                Attempt::Success {
                    raw,
                    spoken,
                    retries,
                } => {
                    return Ok(Settled::Success {
                        raw,
                        spoken,
                        retries,
                    });
                }
                Attempt::Exhausted { retries } => return Ok(Settled::Exhausted { retries }),
            };
        }
    }

    fn call_model(&self) -> Result<String, ConverseError> {
        self.model
            .complete(self.conversation.turns())
            .map_err(ConverseError::ModelFailure)
    }

    fn log_extract_failure(&self, error: &ExtractError, raw: &str, retries: u32) {
        tracing::warn!(
            retries,
            max = self.max_format_retries,
            reply = raw,
            "reply format rejected: {error}"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::turn::{Role, Turn};
    use crate::llm::MockLanguageModel;

    fn structured() -> ReplyPolicy {
        ReplyPolicy::Structured {
            label: "【返答】".to_string(),
        }
    }

    fn engine(policy: ReplyPolicy, model: &MockLanguageModel) -> ConversationEngine {
        ConversationEngine::new(
            Conversation::new("system", "了解しました。"),
            policy,
            Arc::new(model.clone()),
        )
        .with_fallback("すみません。")
    }

    #[test]
    fn test_plain_reply_appended_once() {
        let model = MockLanguageModel::new().with_response("こんにちは。元気です。");
        let mut engine = engine(ReplyPolicy::Plain, &model);

        let outcome = engine.step(["こんにちは"]).unwrap();
        assert_eq!(outcome.spoken, "こんにちは。元気です。");
        assert_eq!(outcome.retries, 0);

        let turns = engine.conversation().turns();
        assert_eq!(turns.len(), 4);
        assert_eq!(turns[2], Turn::user("こんにちは"));
        assert_eq!(turns[3], Turn::assistant("こんにちは。元気です。"));
        assert_eq!(model.call_count(), 1);
    }

    #[test]
    fn test_batch_inputs_sent_in_one_call() {
        let model = MockLanguageModel::new().with_response("はい。");
        let mut engine = engine(ReplyPolicy::Plain, &model);

        engine.step(["一つ目", "二つ目"]).unwrap();

        assert_eq!(model.call_count(), 1);
        let sent = &model.requests()[0];
        let contents: Vec<&str> = sent.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["system", "了解しました。", "一つ目", "...", "二つ目"]);
    }

    #[test]
    fn test_structured_reply_stores_raw_and_speaks_tail() {
        let model = MockLanguageModel::new().with_response("感情: 嬉しい\n【返答】やあ😊！");
        let mut engine = engine(structured(), &model);

        let outcome = engine.step(["やあ"]).unwrap();
        assert_eq!(outcome.spoken, "やあ！");
        assert_eq!(
            engine.conversation().last().unwrap().content,
            "感情: 嬉しい\n【返答】やあ！"
        );
    }

    #[test]
    fn test_retry_then_success_restores_user_text() {
        let model = MockLanguageModel::new()
            .then_respond("ラベルなし")
            .then_respond("感情: 普通\n【返答】はい。");
        let mut engine = engine(structured(), &model);

        let outcome = engine.step(["質問です"]).unwrap();
        assert_eq!(outcome.spoken, "はい。");
        assert_eq!(outcome.retries, 1);

        let requests = model.requests();
        assert_eq!(requests.len(), 2);
        let retried_user = &requests[1].last().unwrap().content;
        assert!(retried_user.starts_with("質問です"));
        assert!(retried_user.contains("【返答】"));

        let turns = engine.conversation().turns();
        assert_eq!(turns[2], Turn::user("質問です"));
    }

    #[test]
    fn test_retry_ceiling_then_fallback_once() {
        let model = MockLanguageModel::new().with_response("いつもラベルなし");
        let mut engine = engine(structured(), &model).with_max_format_retries(5);

        let outcome = engine.step(["こんにちは"]).unwrap();
        assert!(outcome.fell_back);
        assert_eq!(outcome.retries, 5);
        assert_eq!(outcome.spoken, "すみません。");
        assert_eq!(model.call_count(), 6);

        let fallbacks = engine
            .conversation()
            .turns()
            .iter()
            .filter(|t| t.role == Role::Assistant && t.content == "すみません。")
            .count();
        assert_eq!(fallbacks, 1);
        assert_eq!(engine.conversation().len(), 4);
        assert_eq!(engine.conversation().turns()[2], Turn::user("こんにちは"));
    }

    #[test]
    fn test_model_failure_appends_nothing() {
        let model = MockLanguageModel::new()
            .then_fail("network down")
            .with_response("やっと届きました。");
        let mut engine = engine(ReplyPolicy::Plain, &model);

        let err = engine.step(["一回目"]).unwrap_err();
        assert!(matches!(err, ConverseError::ModelFailure(_)));
        assert_eq!(engine.conversation().len(), 3);
        assert_eq!(engine.conversation().last().unwrap(), &Turn::user("一回目"));

        // The unanswered turn is closed with a placeholder before the next input.
        engine.step(["二回目"]).unwrap();
        let contents: Vec<&str> = engine.conversation().turns()[2..]
            .iter()
            .map(|t| t.content.as_str())
            .collect();
        assert_eq!(contents, vec!["一回目", "...", "二回目", "やっと届きました。"]);
    }

    #[test]
    fn test_model_failure_during_retry_restores_user_text() {
        let model = MockLanguageModel::new()
            .then_respond("ラベルなし")
            .then_fail("timeout");
        let mut engine = engine(structured(), &model);

        assert!(engine.step(["元の言葉"]).is_err());
        assert_eq!(engine.conversation().last().unwrap(), &Turn::user("元の言葉"));
    }

    #[test]
    fn test_empty_step_is_rejected() {
        let model = MockLanguageModel::new().with_response("x");
        let mut engine = engine(ReplyPolicy::Plain, &model);
        assert!(matches!(
            engine.step(Vec::<String>::new()),
            Err(ConverseError::NoInput)
        ));
        assert_eq!(model.call_count(), 0);
    }

    #[test]
    fn test_history_trimmed_before_call() {
        let model = MockLanguageModel::new().with_response("はい。");
        let mut engine = engine(ReplyPolicy::Plain, &model);
        for i in 0..5 {
            engine.step([format!("u{i}")]).unwrap();
        }
        for request in model.requests() {
            assert!(request.len() <= 8);
            assert_eq!(request[0], Turn::system("system"));
        }
    }

    #[test]
    fn test_reset_restores_template() {
        let model = MockLanguageModel::new().with_response("はい。");
        let mut engine = engine(ReplyPolicy::Plain, &model);
        engine.step(["hello"]).unwrap();
        engine.reset();
        assert_eq!(engine.conversation().len(), 2);
    }
}

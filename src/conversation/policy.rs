//! How the user-facing part of a model reply is found.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    #[error("reply has no {label:?} section")]
    MissingLabel { label: String },
    #[error("reply has nothing after {label:?}")]
    EmptySection { label: String },
}

/// Reply format selected once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyPolicy {
    /// The whole reply is spoken.
    Plain,
    /// The model writes a preamble first; only the text after the last
    /// `label` is spoken.
    Structured { label: String },
}

impl ReplyPolicy {
    /// Returns the text that should be spoken.
    pub fn extract(&self, raw: &str) -> Result<String, ExtractError> {
        match self {
            ReplyPolicy::Plain => Ok(raw.trim().to_string()),
            ReplyPolicy::Structured { label } => {
                let Some((_, tail)) = raw.rsplit_once(label.as_str()) else {
                    return Err(ExtractError::MissingLabel {
                        label: label.clone(),
                    });
                };
                let tail = tail.trim();
                if tail.is_empty() {
                    return Err(ExtractError::EmptySection {
                        label: label.clone(),
                    });
                }
                Ok(tail.to_string())
            }
        }
    }

    /// Builds a reply the way the model is asked to write it.
    pub fn format(&self, preamble: &str, reply: &str) -> String {
        match self {
            ReplyPolicy::Plain => reply.to_string(),
            ReplyPolicy::Structured { label } => format!("{preamble}\n{label}{reply}"),
        }
    }

    /// Extends the base system prompt with the format instructions.
    pub fn system_prompt(&self, base: &str, structured_instructions: &str) -> String {
        match self {
            ReplyPolicy::Plain => base.to_string(),
            ReplyPolicy::Structured { .. } => format!("{base}\n{structured_instructions}"),
        }
    }

    /// User turn sent on a retry after the label was missing.
    pub fn corrective_prompt(&self, original: &str) -> String {
        match self {
            ReplyPolicy::Plain => original.to_string(),
            ReplyPolicy::Structured { label } => format!(
                "{original}\n\n(前回の返答には「{label}」がありませんでした。指定の形式に従い、最後に必ず「{label}」に続けて返答だけを書いてください。)"
            ),
        }
    }
}

/// Removes emoji and other pictographs that speech synthesis would read out
/// or choke on.
pub fn strip_emoji(text: &str) -> String {
    text.chars().filter(|c| !is_pictographic(*c)).collect()
}

fn is_pictographic(c: char) -> bool {
    matches!(c as u32,
        0x1F000..=0x1FAFF // mahjong, cards, emoticons, symbols, transport, flags
        | 0x2600..=0x27BF  // misc symbols and dingbats
        | 0x2B00..=0x2BFF  // arrows and stars such as ⭐
        | 0x231A..=0x231B
        | 0x23E9..=0x23FA
        | 0xFE0F           // emoji presentation selector
        | 0x200D           // zero width joiner
        | 0x20E3           // keycap
        | 0xE0020..=0xE007F
    )
}

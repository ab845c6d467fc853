//! Conversation history with a fixed template and bounded length.

use crate::defaults;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Dialogue history owned by the conversation station.
///
/// The first turns are the template (system prompt followed by the
/// assistant's acknowledgement) and survive every trim and reset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    template_len: usize,
    turns: Vec<Turn>,
    max_turns: usize,
    keep_recent: usize,
    placeholder: String,
}

impl Conversation {
    pub fn new(system_prompt: &str, acknowledgement: &str) -> Self {
        let template = vec![Turn::system(system_prompt), Turn::assistant(acknowledgement)];
        Self {
            template_len: template.len(),
            turns: template,
            max_turns: defaults::MAX_TURNS,
            keep_recent: defaults::KEEP_RECENT,
            placeholder: defaults::PLACEHOLDER_REPLY.to_string(),
        }
    }

    /// Sets the trim ceiling and how many recent turns survive a trim.
    /// At least one recent turn is always kept.
    pub fn with_limits(mut self, max_turns: usize, keep_recent: usize) -> Self {
        self.max_turns = max_turns;
        self.keep_recent = keep_recent.max(1);
        self
    }

    pub fn with_placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.placeholder = placeholder.into();
        self
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn template(&self) -> &[Turn] {
        &self.turns[..self.template_len]
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Appends user input, first closing an unanswered user turn with the
    /// placeholder so roles keep alternating.
    pub fn push_user(&mut self, text: impl Into<String>) {
        if self.last().is_some_and(|t| t.role == Role::User) {
            self.turns.push(Turn::assistant(self.placeholder.clone()));
        }
        self.turns.push(Turn::user(text));
    }

    pub fn push_assistant(&mut self, text: impl Into<String>) {
        self.turns.push(Turn::assistant(text));
    }

    /// Mutable access to the most recent user turn, if it is the last turn.
    pub fn pending_user_mut(&mut self) -> Option<&mut Turn> {
        self.turns.last_mut().filter(|t| t.role == Role::User)
    }

    /// Shrinks history to the template plus the most recent turns once it
    /// grows past the ceiling. Returns true when anything was removed.
    pub fn trim(&mut self) -> bool {
        if self.turns.len() <= self.max_turns {
            return false;
        }
        let keep_from = self
            .turns
            .len()
            .saturating_sub(self.keep_recent)
            .max(self.template_len);
        self.turns.drain(self.template_len..keep_from);
        true
    }

    /// Drops everything but the template.
    pub fn reset(&mut self) {
        self.turns.truncate(self.template_len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation() -> Conversation {
        Conversation::new("be brief", "ok")
    }

    #[test]
    fn test_starts_with_template() {
        let c = conversation();
        assert_eq!(c.len(), 2);
        assert_eq!(c.turns()[0], Turn::system("be brief"));
        assert_eq!(c.turns()[1], Turn::assistant("ok"));
    }

    #[test]
    fn test_placeholder_between_consecutive_user_turns() {
        let mut c = conversation();
        c.push_user("one");
        c.push_user("two");
        let roles: Vec<Role> = c.turns().iter().map(|t| t.role).collect();
        assert_eq!(
            roles,
            vec![
                Role::System,
                Role::Assistant,
                Role::User,
                Role::Assistant,
                Role::User
            ]
        );
        assert_eq!(c.turns()[3].content, "...");
    }

    #[test]
    fn test_no_placeholder_after_assistant() {
        let mut c = conversation();
        c.push_user("hi");
        c.push_assistant("hello");
        c.push_user("again");
        assert_eq!(c.len(), 5);
        assert!(c.turns().iter().all(|t| t.content != "..."));
    }

    #[test]
    fn test_trim_at_or_below_ceiling_is_noop() {
        let mut c = conversation();
        for i in 0..3 {
            c.push_user(format!("u{i}"));
            c.push_assistant(format!("a{i}"));
        }
        assert_eq!(c.len(), 8);
        let before = c.clone();
        assert!(!c.trim());
        assert_eq!(c, before);
    }

    #[test]
    fn test_trim_keeps_template_and_recent() {
        let mut c = conversation();
        for i in 0..3 {
            c.push_user(format!("u{i}"));
            c.push_assistant(format!("a{i}"));
        }
        c.push_user("u3");
        assert_eq!(c.len(), 9);

        assert!(c.trim());
        assert_eq!(c.len(), 8);
        assert_eq!(c.template(), &[Turn::system("be brief"), Turn::assistant("ok")]);
        let tail: Vec<&str> = c.turns()[2..].iter().map(|t| t.content.as_str()).collect();
        assert_eq!(tail, vec!["a0", "u1", "a1", "u2", "a2", "u3"]);

        let trimmed = c.clone();
        assert!(!c.trim());
        assert_eq!(c, trimmed);
    }

    #[test]
    fn test_custom_limits() {
        let mut c = conversation().with_limits(4, 2);
        c.push_user("a");
        c.push_assistant("b");
        c.push_user("c");
        assert!(c.trim());
        let tail: Vec<&str> = c.turns()[2..].iter().map(|t| t.content.as_str()).collect();
        assert_eq!(tail, vec!["b", "c"]);
    }

    #[test]
    fn test_trim_never_drops_latest_input() {
        let mut c = Conversation::new("sys", "ack").with_limits(4, 0);
        c.push_user("a");
        c.push_assistant("b");
        c.push_user("c");
        assert!(c.trim());
        assert_eq!(c.len(), 3);
        assert_eq!(c.pending_user_mut().unwrap().content, "c");
    }

    #[test]
    fn test_reset_restores_template() {
        let mut c = conversation();
        c.push_user("hello");
        c.push_assistant("hi");
        c.reset();
        assert_eq!(c, conversation());
    }

    #[test]
    fn test_pending_user_mut_only_when_last() {
        let mut c = conversation();
        assert!(c.pending_user_mut().is_none());
        c.push_user("question");
        c.pending_user_mut().unwrap().content.push('?');
        assert_eq!(c.last().unwrap().content, "question?");
        c.push_assistant("answer");
        assert!(c.pending_user_mut().is_none());
    }
}

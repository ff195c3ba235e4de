//! Conversion of stored messages into provider-neutral history.

use medixlm_db::{Message, MessageRole};

use crate::providers::{ChatMessage, ChatRole};

/// Build history messages from the tail of `messages`.
///
/// Keeps at most `window` entries, then drops the oldest until the total
/// content length fits in `char_budget`.
pub fn build_history_messages(
    messages: &[Message],
    window: usize,
    char_budget: usize,
) -> Vec<ChatMessage> {
    let start = messages.len().saturating_sub(window);
    let mut history: Vec<ChatMessage> = messages[start..].iter().map(convert_message).collect();

    let mut total: usize = history.iter().map(|m| m.content.chars().count()).sum();
    let mut drop = 0;
    while total > char_budget && drop < history.len() {
        total -= history[drop].content.chars().count();
        drop += 1;
    }
    history.drain(..drop);

    history
}

fn convert_message(msg: &Message) -> ChatMessage {
    let role = match msg.role {
        MessageRole::User => ChatRole::User,
        MessageRole::Assistant => ChatRole::Assistant,
        MessageRole::System => ChatRole::System,
    };
    ChatMessage::new(role, msg.content.clone())
}

#[cfg(test)]
mod tests {
    use medixlm_db::Metadata;

    use super::*;

    fn message(role: MessageRole, content: &str) -> Message {
        Message {
            id: format!("msg_{content}"),
            conversation_id: "conv_test".to_string(),
            role,
            content: content.to_string(),
            tokens_used: None,
            metadata: Metadata::new(),
            created_at: 0,
        }
    }

    #[test]
    fn test_window_keeps_most_recent_oldest_first() {
        let messages: Vec<Message> = (0..6)
            .map(|i| {
                let role = if i % 2 == 0 {
                    MessageRole::User
                } else {
                    MessageRole::Assistant
                };
                message(role, &format!("m{i}"))
            })
            .collect();

        let history = build_history_messages(&messages, 4, usize::MAX);
        let contents: Vec<_> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m2", "m3", "m4", "m5"]);
        assert_eq!(history[0].role, ChatRole::User);
    }

    #[test]
    fn test_budget_drops_oldest_first() {
        let messages = vec![
            message(MessageRole::User, "aaaaaaaaaa"),
            message(MessageRole::Assistant, "bbbbb"),
            message(MessageRole::User, "ccccc"),
        ];
        let history = build_history_messages(&messages, 10, 10);
        let contents: Vec<_> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["bbbbb", "ccccc"]);
    }

    #[test]
    fn test_single_oversized_message_is_dropped() {
        let messages = vec![message(MessageRole::User, "far too long")];
        assert!(build_history_messages(&messages, 10, 3).is_empty());
    }

    #[test]
    fn test_zero_window() {
        let messages = vec![message(MessageRole::User, "hi")];
        assert!(build_history_messages(&messages, 0, 100).is_empty());
    }
}

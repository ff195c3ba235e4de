//! Context assembly: persona, knowledge and recent turns into one request.

use medixlm_core::ChatSettings;
use medixlm_db::Message;
use medixlm_knowledge::ScoredNode;

use crate::chat::history::build_history_messages;
use crate::prompt::{KNOWLEDGE_CLOSING, KNOWLEDGE_HEADING, NO_KNOWLEDGE_MARKER, base_system_prompt};
use crate::providers::ChatMessage;

/// Everything the generation backend receives for one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledContext {
    pub system_instructions: String,
    /// Prior turns oldest-first, ending with the message being answered.
    pub history: Vec<ChatMessage>,
}

#[derive(Debug, Clone)]
pub struct ContextAssembler {
    persona: String,
    history_window: usize,
    history_char_budget: usize,
}

impl ContextAssembler {
    pub fn new(persona: impl Into<String>, history_window: usize, history_char_budget: usize) -> Self {
        Self {
            persona: persona.into(),
            history_window,
            history_char_budget,
        }
    }

    /// Built-in persona unless `persona_override` is given.
    pub fn from_settings(settings: &ChatSettings, persona_override: Option<String>) -> Self {
        Self::new(
            persona_override.unwrap_or_else(|| base_system_prompt().to_string()),
            settings.history_window,
            settings.history_char_budget,
        )
    }

    pub fn history_window(&self) -> usize {
        self.history_window
    }

    /// `recent` must not contain `current_message`; it is appended last.
    pub fn assemble(
        &self,
        recent: &[Message],
        knowledge: &[ScoredNode],
        current_message: &str,
    ) -> AssembledContext {
        let mut history =
            build_history_messages(recent, self.history_window, self.history_char_budget);
        history.push(ChatMessage::user(current_message));

        AssembledContext {
            system_instructions: format!(
                "{}\n\n{}",
                self.persona.trim_end(),
                render_knowledge_block(knowledge)
            ),
            history,
        }
    }
}

/// Knowledge section of the system instructions. Never empty: without
/// knowledge it carries an explicit marker instead of entries.
pub fn render_knowledge_block(knowledge: &[ScoredNode]) -> String {
    if knowledge.is_empty() {
        return format!("{KNOWLEDGE_HEADING}\n{NO_KNOWLEDGE_MARKER}");
    }

    let lines: Vec<String> = knowledge
        .iter()
        .map(|scored| {
            let node = &scored.node;
            match node.description.as_deref().map(str::trim) {
                Some(description) if !description.is_empty() => {
                    format!("- {} ({}): {}", node.name, node.node_type, description)
                }
                _ => format!("- {} ({})", node.name, node.node_type),
            }
        })
        .collect();

    format!(
        "{KNOWLEDGE_HEADING}\n{}\n\n{KNOWLEDGE_CLOSING}",
        lines.join("\n")
    )
}

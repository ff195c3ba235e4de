//! Base system prompt definitions for MediXLM.

/// Built-in persona and safety instructions.
const SYSTEM_BASE: &str = "You are MediXLM, an AI medical assistant providing accurate, evidence-based medical information.

IMPORTANT:
- Base answers on the provided medical knowledge
- Acknowledge uncertainty when information is limited
- Recommend consulting healthcare professionals for diagnoses and treatment
- Never provide definitive diagnoses or prescribe medications
- Use clear, empathetic language

If patient describes emergency symptoms (chest pain, difficulty breathing, stroke signs, severe bleeding, suicidal thoughts), immediately recommend emergency care.";

pub const KNOWLEDGE_HEADING: &str = "## Relevant Medical Knowledge:";

pub const KNOWLEDGE_CLOSING: &str = "Use this knowledge to inform your response, but always recommend professional medical evaluation for specific medical advice.";

/// Emitted in place of knowledge lines so the model can tell "nothing
/// retrieved" apart from a missing section.
pub const NO_KNOWLEDGE_MARKER: &str = "No specific medical knowledge found for this query.";

/// The base system prompt for MediXLM
pub fn base_system_prompt() -> &'static str {
    SYSTEM_BASE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_prompt_carries_safety_rules() {
        let prompt = base_system_prompt();
        assert!(prompt.starts_with("You are MediXLM"));
        assert!(prompt.contains("Never provide definitive diagnoses"));
        assert!(prompt.contains("immediately recommend emergency care"));
    }
}

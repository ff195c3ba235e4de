pub mod context;
pub mod generator;
pub mod history;

pub use context::{AssembledContext, ContextAssembler, render_knowledge_block};
pub use generator::{GeneratedResponse, ResponseGenerator};
pub use history::build_history_messages;

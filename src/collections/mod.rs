mod conversations;
mod notes;
mod servers;
mod tools;

pub use conversations::ConversationStore;
pub use notes::NoteStore;
pub use servers::{ServerConfigStore, ServerMap};
pub use tools::{ModelCatalog, ToolRegistry};

pub const CONVERSATIONS_KEY: &str = "conversations";
pub const SERVERS_KEY: &str = "mcpServers";
pub const TOOLS_KEY: &str = "tools";
pub const MODELS_KEY: &str = "models";
pub const NOTES_KEY: &str = "notes";

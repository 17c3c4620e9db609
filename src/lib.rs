pub mod chat;
pub mod config;
pub mod models;
pub mod utils;

// Re-export main types for convenience
pub use chat::{ChatClient, ChatState, Command, UiEvent};
pub use models::*;

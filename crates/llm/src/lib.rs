pub mod providers;

pub use providers::claude::ClaudeBackend;
pub use providers::create_backend;

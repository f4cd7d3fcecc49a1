pub mod cache;
pub mod cli;
pub mod config;
pub mod i18n;
pub mod llm;
pub mod pipeline;
pub mod prompts;
pub mod storage;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use pipeline::context::PipelineContext;
pub use pipeline::workflow::{get_state, launch, resume, start_detached};

pub mod executor;
pub mod templates;

// Re-export the main types for easier usage
pub use executor::{Executor, ShellExecutor};
pub use templates::{ConfigRenderer, TemplateArgs, TemplateSet};

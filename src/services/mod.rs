pub mod ai;
pub mod command;

pub use self::ai::{OllamaInterpreter, OpenAiInterpreter};
pub use self::command::{format_output, ProcessExecutor};

pub mod catalog;
pub mod interpreter;
pub mod lib;
pub mod os;
pub mod safety;

pub use self::catalog::PatternCatalog;
pub use self::interpreter::{
    CommandInterpreter, CommandRequest, InterpretOutcome, InterpreterConfig, Resolution,
    ResolutionSource,
};
pub use self::lib::{
    CommandExecutor, ExecutionResult, ExternalError, ExternalInterpreter, ExternalQuery,
    Suggestion, TaiError, TaiResult,
};
pub use self::os::{OsDescriptor, Platform, ShellFamily};
pub use self::safety::{RuleCategory, SafetyValidator};

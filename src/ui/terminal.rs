use colored::*;
use rustyline::completion::{Completer, FilenameCompleter, Pair};
use rustyline::error::ReadlineError;
use rustyline::highlight::{Highlighter, MatchingBracketHighlighter};
use rustyline::hint::{Hinter, HistoryHinter};
use rustyline::history::DefaultHistory;
use rustyline::validate::{MatchingBracketValidator, Validator};
use rustyline::{CompletionType, Config, EditMode, Editor};
use std::borrow::Cow;
use std::path::PathBuf;

use tai::core::{
    CommandInterpreter, CommandRequest, ExecutionResult, Resolution, ResolutionSource,
};
use tai::services::format_output;

pub struct TaiCompleter {
    filename_completer: FilenameCompleter,
    phrases: Vec<String>,
}

impl TaiCompleter {
    fn new(phrases: Vec<String>) -> Self {
        Self {
            filename_completer: FilenameCompleter::new(),
            phrases,
        }
    }
}

impl Completer for TaiCompleter {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        // Whole-line phrase completion first, then file names.
        let typed = line[..pos].to_lowercase();
        if !typed.trim().is_empty() {
            let matches: Vec<Pair> = self
                .phrases
                .iter()
                .filter(|phrase| phrase.starts_with(typed.trim_start()))
                .map(|phrase| Pair {
                    display: phrase.clone(),
                    replacement: phrase.clone(),
                })
                .collect();
            if !matches.is_empty() {
                return Ok((0, matches));
            }
        }
        self.filename_completer.complete(line, pos, ctx)
    }
}

pub struct TaiHelper {
    completer: TaiCompleter,
    validator: MatchingBracketValidator,
    highlighter: MatchingBracketHighlighter,
    hinter: HistoryHinter,
}

impl rustyline::Helper for TaiHelper {}

impl TaiHelper {
    fn new(phrases: Vec<String>) -> Self {
        Self {
            completer: TaiCompleter::new(phrases),
            validator: MatchingBracketValidator::new(),
            highlighter: MatchingBracketHighlighter::new(),
            hinter: HistoryHinter {},
        }
    }
}

impl Completer for TaiHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        self.completer.complete(line, pos, ctx)
    }
}

impl Validator for TaiHelper {
    fn validate(
        &self,
        ctx: &mut rustyline::validate::ValidationContext,
    ) -> rustyline::Result<rustyline::validate::ValidationResult> {
        self.validator.validate(ctx)
    }
}

impl Highlighter for TaiHelper {
    fn highlight<'l>(&self, line: &'l str, pos: usize) -> Cow<'l, str> {
        self.highlighter.highlight(line, pos)
    }

    fn highlight_char(&self, line: &str, pos: usize, forced: bool) -> bool {
        self.highlighter.highlight_char(line, pos, forced)
    }
}

impl Hinter for TaiHelper {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, ctx: &rustyline::Context<'_>) -> Option<String> {
        self.hinter.hint(line, pos, ctx)
    }
}

/// Prints what a request resolved to.
pub fn print_resolution(resolution: &Resolution) {
    match resolution {
        Resolution::Resolved {
            command,
            source,
            explanation,
        } => {
            println!(
                "{} {} {}",
                "📎 Command:".blue(),
                command.yellow(),
                format!("({})", source).dimmed()
            );
            if let Some(explanation) = explanation {
                println!("{} {}", "💡 Details:".blue(), explanation);
            }
        }
        Resolution::Rejected { command, rule } => {
            eprintln!(
                "{} {}",
                "⛔ Refusing to run potentially destructive command:".red().bold(),
                command.yellow()
            );
            eprintln!("{} {}", "Matched safety rule:".red(), rule);
        }
        Resolution::Unresolved { reason } => {
            eprintln!(
                "{} {}",
                "❌ Command not understood:".red().bold(),
                reason
            );
            eprintln!("{}", "Try rephrasing your request or use more specific terms.".yellow());
        }
    }
}

/// Prints captured output, truncated to `max_lines`.
pub fn print_execution(result: &ExecutionResult, max_lines: usize) {
    let stdout = format_output(&result.stdout, max_lines);
    if !stdout.is_empty() {
        println!("{}", stdout);
    }
    let stderr = format_output(&result.stderr, max_lines);
    if result.succeeded {
        if !stderr.is_empty() {
            eprintln!("{} {}", "Warning:".yellow(), stderr);
        }
    } else if result.timed_out {
        eprintln!("{}", stderr.red());
    } else {
        let code = result
            .exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "none".to_string());
        eprintln!(
            "{}",
            format!("Command failed (exit code: {}): {}", code, stderr).red()
        );
    }
}

pub struct TaiTerminal {
    editor: Editor<TaiHelper, DefaultHistory>,
    interpreter: CommandInterpreter,
    working_dir: PathBuf,
    max_output_lines: usize,
    dry_run: bool,
}

impl TaiTerminal {
    pub fn new(
        interpreter: CommandInterpreter,
        working_dir: PathBuf,
        max_output_lines: usize,
        dry_run: bool,
    ) -> Result<Self, ReadlineError> {
        let config = Config::builder()
            .completion_type(CompletionType::List)
            .edit_mode(EditMode::Emacs)
            .build();
        let mut editor = Editor::with_config(config)?;
        let phrases = interpreter
            .catalog()
            .entries()
            .map(|e| e.phrase.clone())
            .collect();
        editor.set_helper(Some(TaiHelper::new(phrases)));
        Ok(Self {
            editor,
            interpreter,
            working_dir,
            max_output_lines,
            dry_run,
        })
    }

    pub fn display_welcome(&self) {
        println!("{}", "=== tai: plain-language shell commands ===".green().bold());
        println!("{} {}", "System:".blue(), self.interpreter.os().display_name());
        match self.interpreter.external_name() {
            Some(name) => println!("{} {}", "AI fallback:".blue(), name),
            None => println!("{} {}", "AI fallback:".blue(), "disabled".dimmed()),
        }
        println!(
            "{}",
            "\nType a request such as 'list files', or 'help' for more.".yellow()
        );
    }

    fn display_help(&self) {
        println!("{}", "Built-in commands:".blue().bold());
        println!("  {}  show this help", "help".green());
        println!("  {}  list known phrases (optionally filtered)", "patterns [term]".green());
        println!("  {}  show system information", "info".green());
        println!("  {}  leave the terminal", "exit | quit".green());
        println!(
            "{}",
            "Anything else is interpreted as a request and turned into a command.".yellow()
        );
    }

    fn display_patterns(&self, term: &str) {
        let catalog = self.interpreter.catalog();
        let entries = if term.is_empty() {
            catalog.all()
        } else {
            catalog.search(term)
        };
        if entries.is_empty() {
            println!("{}", "No matching phrases.".yellow());
            return;
        }
        for (phrase, command) in entries {
            println!("  {:<28} {}", phrase.green(), command);
        }
    }

    fn prompt(&self) -> String {
        let components: Vec<String> = self
            .working_dir
            .components()
            .filter_map(|c| match c {
                std::path::Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        let dir_display = match components.len() {
            0 => "/".to_string(),
            1 => components[0].clone(),
            n => format!("{}/{}", components[n - 2], components[n - 1]),
        };
        format!("tai[{}]> ", dir_display)
    }

    pub async fn run(&mut self) {
        self.display_welcome();

        loop {
            match self.process_input().await {
                Ok(true) => {
                    println!("{}", "Goodbye!".green());
                    break;
                }
                Ok(false) => {}
                Err(ReadlineError::Interrupted) => {
                    println!("{}", "CTRL-C pressed. Use 'exit' or 'quit' to exit properly.".yellow());
                }
                Err(ReadlineError::Eof) => {
                    println!("{}", "Goodbye!".green());
                    break;
                }
                Err(err) => {
                    eprintln!("{} {}", "Error:".red(), err);
                    break;
                }
            }
        }
    }

    async fn process_input(&mut self) -> Result<bool, ReadlineError> {
        let prompt = self.prompt();
        let line = self.editor.readline(&prompt)?;
        let input = line.trim();
        if input.is_empty() {
            return Ok(false);
        }
        self.editor.add_history_entry(input)?;

        let (word, rest) = input.split_once(' ').unwrap_or((input, ""));
        match word {
            "exit" | "quit" => return Ok(true),
            "help" if rest.is_empty() => self.display_help(),
            "patterns" => self.display_patterns(rest.trim()),
            "info" if rest.is_empty() => self.display_welcome(),
            _ => self.process_request(input).await?,
        }
        Ok(false)
    }

    async fn process_request(&mut self, input: &str) -> Result<(), ReadlineError> {
        let request = CommandRequest::new(input).with_working_dir(self.working_dir.clone());
        let resolution = self.interpreter.resolve(&request).await;
        print_resolution(&resolution);

        let Resolution::Resolved { source, explanation, .. } = &resolution else {
            return Ok(());
        };
        if self.dry_run {
            return Ok(());
        }
        if *source == ResolutionSource::ExternalModel
            && !self.confirm_suggestion(explanation.as_deref())?
        {
            println!("{}", "Command execution cancelled.".yellow());
            return Ok(());
        }

        let outcome = self.interpreter.execute(&request, resolution).await;
        if let Some(result) = &outcome.execution {
            print_execution(result, self.max_output_lines);
            if let Some(dir) = &result.working_dir {
                self.working_dir = dir.clone();
            }
        }
        Ok(())
    }

    /// Asks before running a model-generated command.
    fn confirm_suggestion(&mut self, explanation: Option<&str>) -> Result<bool, ReadlineError> {
        println!(
            "{}",
            "\nWould you like to execute this command? [y/N/e(explain)]:".yellow()
        );
        let answer = self.editor.readline("")?;
        match answer.trim().to_lowercase().as_str() {
            "y" | "yes" => Ok(true),
            "e" => {
                match explanation {
                    Some(explanation) => {
                        println!("{}", "\n=== Command Explanation ====".blue().bold());
                        println!("{}", explanation);
                    }
                    None => println!(
                        "{}",
                        "No detailed explanation available for this command.".yellow()
                    ),
                }
                println!("{}", "\nWould you like to execute this command now? [y/N]:".yellow());
                let second = self.editor.readline("")?;
                Ok(matches!(second.trim().to_lowercase().as_str(), "y" | "yes"))
            }
            _ => Ok(false),
        }
    }
}

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::settings::{ApiKey, Provider, Settings};
use crate::core::lib::{ExternalError, ExternalInterpreter, ExternalQuery, Suggestion};

pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

const SYSTEM_PROMPT: &str = "You are a terminal command generator that converts natural language requests into precise, executable shell commands.

1. Generate a single command that can be executed directly without modification.
2. Prefer safe, non-destructive commands when the request is ambiguous. Never suggest commands that delete system files, format disks or power off the machine.
3. Use commands that exist on the user's operating system and shell.
4. Commands are run without a shell: do not rely on pipes, redirections, globbing or variable expansion. Chain steps with '&&' only when unavoidable.
5. Answer in exactly this format with no extra text:

COMMAND: <the exact command to execute>
EXPLANATION: <a concise explanation of the command>";

/// User prompt for a query; shared by every provider.
pub fn build_prompt(query: &ExternalQuery<'_>) -> String {
    let working_dir = query
        .working_dir
        .map(|d| d.display().to_string())
        .or_else(|| std::env::current_dir().ok().map(|d| d.display().to_string()))
        .unwrap_or_else(|| "unknown".to_string());
    format!(
        "User request: '{}'\nOperating system: {}\nShell: {}\nWorking directory: {}",
        query.request,
        query.os.display_name(),
        query.os.shell.as_str(),
        working_dir
    )
}

/// Extracts a command from a `COMMAND:` / `EXPLANATION:` reply.
pub fn parse_reply(text: &str) -> Result<Suggestion, ExternalError> {
    let mut command = None;
    let mut explanation = None;
    for line in text.lines() {
        let line = line.trim();
        if let Some(rest) = strip_label(line, "COMMAND:") {
            command = Some(clean_command(rest));
        } else if let Some(rest) = strip_label(line, "EXPLANATION:") {
            let rest = rest.trim();
            if !rest.is_empty() {
                explanation = Some(rest.to_string());
            }
        }
    }

    match command {
        Some(command) if !command.is_empty() => Ok(Suggestion {
            command,
            explanation,
        }),
        Some(_) => Err(ExternalError::InvalidResponse("empty command".to_string())),
        None => Err(ExternalError::InvalidResponse(format!(
            "no COMMAND line in reply: {}",
            text.trim()
        ))),
    }
}

fn strip_label<'a>(line: &'a str, label: &str) -> Option<&'a str> {
    let line = line.trim_start_matches(['*', '-', ' ']);
    line.get(..label.len())
        .filter(|head| head.eq_ignore_ascii_case(label))
        .map(|_| &line[label.len()..])
        .map(|rest| rest.trim_start_matches('*'))
}

fn clean_command(raw: &str) -> String {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    let fence = FENCE.get_or_init(|| {
        Regex::new(r"^(?:```(?:(?:bash|sh|shell|zsh|console|powershell|cmd)\s+)?(.*?)```|`(.*)`)$").ok()
    });
    let raw = raw.trim();
    fence
        .as_ref()
        .and_then(|re| re.captures(raw))
        .and_then(|c| c.get(1).or_else(|| c.get(2)))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_else(|| raw.to_string())
}

fn http_client(timeout: Duration) -> Result<Client, ExternalError> {
    Ok(Client::builder().timeout(timeout).build()?)
}

fn map_send_error(e: reqwest::Error) -> ExternalError {
    if e.is_timeout() {
        ExternalError::Timeout
    } else if e.is_connect() {
        ExternalError::Provider(format!("could not connect to model service: {}", e))
    } else {
        ExternalError::Http(e)
    }
}

/// OpenAI-compatible chat-completions client.
#[derive(Debug)]
pub struct OpenAiInterpreter {
    client: Client,
    api_key: ApiKey,
    model: String,
    base_url: String,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiInterpreter {
    pub fn new(api_key: ApiKey, model: impl Into<String>, timeout: Duration) -> Result<Self, ExternalError> {
        Ok(Self {
            client: http_client(timeout)?,
            api_key,
            model: model.into(),
            base_url: DEFAULT_OPENAI_URL.to_string(),
            max_tokens: 150,
            temperature: 0.1,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_limits(mut self, max_tokens: u32, temperature: f32) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }
}

#[async_trait::async_trait]
impl ExternalInterpreter for OpenAiInterpreter {
    fn name(&self) -> &str {
        "openai"
    }

    async fn interpret(&self, query: &ExternalQuery<'_>) -> Result<Suggestion, ExternalError> {
        let prompt = build_prompt(query);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose())
            .json(&request)
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ExternalError::Unauthenticated);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExternalError::Provider(format!("HTTP {}: {}", status, body)));
        }

        let body: ChatResponse = response.json().await?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        parse_reply(&content)
    }
}

/// Client for a local Ollama server.
#[derive(Debug)]
pub struct OllamaInterpreter {
    client: Client,
    model: String,
    api_url: String,
}

impl OllamaInterpreter {
    pub fn new(model: impl Into<String>, base_url: impl Into<String>, timeout: Duration) -> Result<Self, ExternalError> {
        Ok(Self {
            client: http_client(timeout)?,
            model: model.into(),
            api_url: format!("{}/api/generate", base_url.into().trim_end_matches('/')),
        })
    }
}

#[async_trait::async_trait]
impl ExternalInterpreter for OllamaInterpreter {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn interpret(&self, query: &ExternalQuery<'_>) -> Result<Suggestion, ExternalError> {
        let response = self
            .client
            .post(&self.api_url)
            .json(&json!({
                "model": self.model,
                "system": SYSTEM_PROMPT,
                "prompt": build_prompt(query),
                "stream": false
            }))
            .send()
            .await
            .map_err(map_send_error)?;

        let text = response.text().await?;
        let body: Value = serde_json::from_str(&text)?;
        if let Some(error) = body.get("error") {
            let error_msg = error.as_str().unwrap_or("Unknown error");
            if error_msg.contains("model") {
                return Err(ExternalError::Provider(format!(
                    "model '{}' not found; run 'ollama pull {}'",
                    self.model, self.model
                )));
            }
            return Err(ExternalError::Provider(format!("Ollama error: {}", error_msg)));
        }

        let reply = body
            .get("response")
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim();
        parse_reply(reply)
    }
}

/// Builds the configured external interpreter, or `None` when the fallback
/// is disabled or lacks a credential.
pub fn from_settings(settings: &Settings) -> Option<Arc<dyn ExternalInterpreter>> {
    if !settings.is_ai_enabled() {
        tracing::debug!("external interpreter disabled");
        return None;
    }
    let ai = &settings.ai;
    let timeout = Duration::from_secs(ai.request_timeout_secs);
    let built: Result<Arc<dyn ExternalInterpreter>, ExternalError> = match ai.provider {
        Provider::OpenAi => {
            let api_key = settings.api_key()?;
            OpenAiInterpreter::new(api_key, &ai.model, timeout).map(|client| {
                let client = client.with_limits(ai.max_tokens, ai.temperature);
                let client = match &ai.base_url {
                    Some(url) => client.with_base_url(url),
                    None => client,
                };
                Arc::new(client) as Arc<dyn ExternalInterpreter>
            })
        }
        Provider::Ollama => OllamaInterpreter::new(
            &ai.model,
            ai.base_url.as_deref().unwrap_or(DEFAULT_OLLAMA_URL),
            timeout,
        )
        .map(|client| Arc::new(client) as Arc<dyn ExternalInterpreter>),
    };
    match built {
        Ok(client) => Some(client),
        Err(e) => {
            tracing::warn!(error = %e, "could not set up external interpreter");
            None
        }
    }
}

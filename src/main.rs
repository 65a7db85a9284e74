use anyhow::Result;
use liteui::{
    ChatError, Config, Conversation, OllamaProvider, StreamCallbacks, StreamOutcome, UsageMetrics,
    conversation::{SubmitError, TurnUpdater},
    providers::Provider,
    stats::GenerationStats,
};
use std::io::{Write, stdout};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

#[derive(Debug, PartialEq)]
enum Command<'a> {
    Models,
    Model(&'a str),
    Url(&'a str),
    Reset,
    Help,
    Quit,
    Unknown(&'a str),
    Message(&'a str),
}

fn parse_command(line: &str) -> Command<'_> {
    let line = line.trim();
    let Some(rest) = line.strip_prefix('/') else {
        return Command::Message(line);
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };

    match name {
        "models" => Command::Models,
        "model" => Command::Model(arg),
        "url" => Command::Url(arg),
        "reset" | "clear" => Command::Reset,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        _ => Command::Unknown(name),
    }
}

/// Prints a streaming answer incrementally while keeping the conversation current
struct TerminalView<'a> {
    turn: TurnUpdater<'a>,
    printed_thinking: usize,
    printed_content: String,
}

impl<'a> TerminalView<'a> {
    fn new(turn: TurnUpdater<'a>) -> Self {
        Self {
            turn,
            printed_thinking: 0,
            printed_content: String::new(),
        }
    }

    fn print_thinking(&mut self, thinking: &str) {
        if thinking.len() > self.printed_thinking && self.printed_content.is_empty() {
            print!("{DIM}{}{RESET}", &thinking[self.printed_thinking..]);
            self.printed_thinking = thinking.len();
        }
    }

    fn print_content(&mut self, content: &str) {
        // Hold back an unterminated think block until it is extracted
        let visible = match content.find("<think") {
            Some(pos) => &content[..pos],
            None => content,
        };

        if let Some(delta) = visible.strip_prefix(self.printed_content.as_str()) {
            if delta.is_empty() {
                return;
            }
            if self.printed_content.is_empty() && self.printed_thinking > 0 {
                println!();
            }
            print!("{delta}");
        } else {
            print!("\n{visible}");
        }
        self.printed_content = visible.to_string();
    }
}

impl StreamCallbacks for TerminalView<'_> {
    fn on_chunk(&mut self, content: &str, thinking: Option<&str>) {
        if let Some(thinking) = thinking {
            self.print_thinking(thinking);
        }
        self.print_content(content);
        let _ = stdout().flush();

        self.turn.on_chunk(content, thinking);
    }

    fn on_complete(&mut self, usage: Option<UsageMetrics>) {
        self.turn.on_complete(usage);
    }

    fn on_error(&mut self, error: ChatError) {
        println!("\n*Error: {}*", error);
        self.turn.on_error(error);
    }
}

async fn pick_model(provider: &OllamaProvider, preferred: Option<&str>) -> Option<String> {
    let models = provider.list_models().await;
    match preferred {
        Some(name) if models.is_empty() || models.iter().any(|m| m == name) => Some(name.to_string()),
        Some(name) => {
            warn!("Model '{}' not available, using {}", name, models[0]);
            models.into_iter().next()
        }
        None => models.into_iter().next(),
    }
}

async fn ask(
    provider: &OllamaProvider,
    conversation: &mut Conversation,
    model: &str,
    text: &str,
) -> Result<()> {
    let pending = match conversation.submit(text) {
        Ok(pending) => pending,
        Err(SubmitError::Empty) => return Ok(()),
        Err(e) => anyhow::bail!(e),
    };

    let cancel = CancellationToken::new();
    let outcome = {
        let mut view = TerminalView::new(TurnUpdater::new(conversation, pending.id));
        let stream = provider.stream_chat(model, &pending.history, &pending.user_text, &mut view, &cancel);

        tokio::select! {
            outcome = stream => outcome,
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
                StreamOutcome::Cancelled
            }
        }
    };

    println!();
    match outcome {
        StreamOutcome::Completed => {
            if let Some(stats) = conversation.turn(pending.id).and_then(GenerationStats::from_turn) {
                println!("{DIM}{stats}{RESET}");
            }
        }
        StreamOutcome::Cancelled => {
            conversation.abandon(pending.id);
            println!("{DIM}(stopped){RESET}");
        }
        StreamOutcome::Failed => {}
    }

    Ok(())
}

fn print_help() {
    println!("Commands:");
    println!("  /models         list models on the server");
    println!("  /model <name>   switch model");
    println!("  /url [base]     set (or clear) the server base URL");
    println!("  /reset          clear the conversation");
    println!("  /quit           exit");
    println!("Ctrl-C stops a streaming answer.");
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let mut config = Config::load()?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    info!("liteui v{}", liteui::VERSION);

    let mut provider = OllamaProvider::from_config(&config.ollama);
    let mut model = pick_model(&provider, config.ollama.model.as_deref()).await;
    let mut conversation = Conversation::new();

    println!("liteui v{} · {}", liteui::VERSION, provider.base_url());
    match &model {
        Some(name) => println!("Model: {name}"),
        None => println!("No models found. Is Ollama running? Use /url to point elsewhere."),
    }
    println!("Type /help for commands.\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };

        match parse_command(&line) {
            Command::Message("") => {}
            Command::Message(text) => match &model {
                Some(name) => ask(&provider, &mut conversation, name, text).await?,
                None => println!("No model selected. Use /models and /model <name>."),
            },
            Command::Models => {
                let models = provider.list_models().await;
                if models.is_empty() {
                    println!("No models available at {}", provider.base_url());
                }
                for name in models {
                    let marker = if model.as_deref() == Some(name.as_str()) { "*" } else { " " };
                    println!("{marker} {name}");
                }
            }
            Command::Model("") => println!("Usage: /model <name>"),
            Command::Model(name) => {
                model = Some(name.to_string());
                println!("Model: {name}");
            }
            Command::Url(url) => {
                if let Err(e) = config.save_base_url(url) {
                    warn!("Failed to save base URL: {:#}", e);
                }
                provider = OllamaProvider::from_config(&config.ollama);
                model = pick_model(&provider, model.as_deref()).await;
                println!("Server: {}", provider.base_url());
                if let Some(name) = &model {
                    println!("Model: {name}");
                }
            }
            Command::Reset => {
                conversation.reset();
                println!("Conversation cleared.");
            }
            Command::Help => print_help(),
            Command::Quit => break,
            Command::Unknown(name) => println!("Unknown command: /{name} (try /help)"),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_command("/models"), Command::Models);
        assert_eq!(parse_command("/model  qwen3 "), Command::Model("qwen3"));
        assert_eq!(parse_command("/url"), Command::Url(""));
        assert_eq!(parse_command("/url http://gpu:11434"), Command::Url("http://gpu:11434"));
        assert_eq!(parse_command("/clear"), Command::Reset);
        assert_eq!(parse_command("/q"), Command::Quit);
        assert_eq!(parse_command("/nope"), Command::Unknown("nope"));
        assert_eq!(parse_command("  hello there "), Command::Message("hello there"));
    }
}

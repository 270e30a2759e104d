//! Startup helpers for the store server and the terminal client.

use std::path::PathBuf;
use std::process::ExitCode;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::conversation::{
    AttachmentSource, AttachmentState, ConversationEngine, EngineConfig, EngineEvent, Message, MessageBody,
};
use crate::server::{self, AppState};

/// Environment variable carrying the session's bearer token.
pub const TOKEN_ENV: &str = "POSTPILOT_TOKEN";
/// Environment variable overriding the store server port.
pub const PORT_ENV: &str = "POSTPILOT_PORT";

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn runtime() -> Option<tokio::runtime::Runtime> {
    match tokio::runtime::Runtime::new() {
        Ok(rt) => Some(rt),
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            None
        }
    }
}

/// Run the in-memory message store (used by the `postpilot-store` binary).
///
/// # Returns
/// `ExitCode::SUCCESS` on graceful shutdown, `1` on failure.
#[must_use]
pub fn run_server() -> ExitCode {
    init_tracing();
    tracing::info!("Starting postpilot store v{}", env!("CARGO_PKG_VERSION"));

    let Some(rt) = runtime() else {
        return ExitCode::from(1);
    };
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Cannot listen for shutdown signal: {e}");
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutting down");
    };

    if let Err(e) = rt.block_on(server::run_server_with_shutdown(AppState::new(), get_port(), shutdown)) {
        tracing::error!("Server error: {e}");
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

/// Run the terminal client against the store named by `POSTPILOT_BASE_URL`.
///
/// # Returns
/// `ExitCode::SUCCESS` when the user quits, `1` on failure.
#[must_use]
pub fn run_client() -> ExitCode {
    init_tracing();

    let Ok(token) = std::env::var(TOKEN_ENV) else {
        tracing::error!("{TOKEN_ENV} is not set");
        return ExitCode::from(1);
    };
    let config = EngineConfig::from_env();
    tracing::info!("Store endpoint: {}", config.base_url);

    let Some(rt) = runtime() else {
        return ExitCode::from(1);
    };
    match rt.block_on(client_loop(config, token)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Client error: {e}");
            ExitCode::from(1)
        }
    }
}

/// Get configured server port.
#[must_use]
pub fn get_port() -> u16 {
    std::env::var(PORT_ENV)
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(server::DEFAULT_PORT)
}

/// A line typed at the prompt.
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Send(String),
    Older,
    Attach(PathBuf),
    Detach,
    Clear,
    Quit,
    Unknown(String),
}

impl Command {
    fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        let Some(rest) = trimmed.strip_prefix('/') else {
            return Self::Send(line.to_string());
        };
        let (name, arg) = rest.split_once(' ').unwrap_or((rest, ""));
        match (name, arg.trim()) {
            ("older", _) => Self::Older,
            ("attach", path) if !path.is_empty() => Self::Attach(PathBuf::from(path)),
            ("detach", _) => Self::Detach,
            ("clear", _) => Self::Clear,
            ("quit" | "exit", _) => Self::Quit,
            _ => Self::Unknown(trimmed.to_string()),
        }
    }
}

async fn client_loop(config: EngineConfig, token: String) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let engine = ConversationEngine::connect(&config, token)?;
    let printer = tokio::spawn(print_events(engine.clone(), engine.subscribe()));

    // failures already surface as notices
    let _ = engine.load_older().await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match Command::parse(&line) {
            Command::Send(text) => {
                engine.set_draft(text);
                let _ = engine.send().await;
            }
            Command::Older => {
                let _ = engine.load_older().await;
            }
            Command::Attach(path) => {
                engine.select_attachment(AttachmentSource::Path(path));
            }
            Command::Detach => engine.remove_attachment(),
            Command::Clear => {
                if let Err(e) = engine.clear().await {
                    tracing::warn!("Clear failed: {e}");
                }
            }
            Command::Quit => break,
            Command::Unknown(input) => tracing::warn!("Unknown command: {input}"),
        }
    }

    printer.abort();
    Ok(())
}

fn render(message: &Message) -> String {
    let body = match &message.body {
        MessageBody::Text(text) => text.clone(),
        MessageBody::Image(uri) => format!("[image, {} bytes]", uri.len()),
    };
    format!("[{}] {}: {body}", message.display_time(), message.role)
}

fn describe(engine: &ConversationEngine, event: EngineEvent) -> Option<String> {
    match event {
        EngineEvent::HistoryPrepended { count } => {
            let messages = engine.messages();
            let mut out = format!("-- {count} earlier messages --");
            for message in messages.iter().take(count) {
                out.push('\n');
                out.push_str(&render(message));
            }
            Some(out)
        }
        EngineEvent::MessageAppended(message) => Some(render(&message)),
        EngineEvent::FullyLoaded => Some("-- start of conversation --".to_string()),
        EngineEvent::Cleared => Some("-- conversation cleared --".to_string()),
        EngineEvent::StatusChanged(Some(status)) => Some(format!("... {status}")),
        EngineEvent::AttachmentChanged(Some(attachment)) => match attachment.state {
            AttachmentState::Encoding => Some(format!("encoding {}", attachment.source_name)),
            AttachmentState::Ready { .. } => Some(format!("attached {}", attachment.source_name)),
        },
        EngineEvent::Notice(notice) => Some(format!("! {}", notice.message)),
        _ => None,
    }
}

async fn print_events(engine: ConversationEngine, mut events: broadcast::Receiver<EngineEvent>) {
    let mut stdout = tokio::io::stdout();
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!("Dropped {skipped} events");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        if let Some(line) = describe(&engine, event) {
            let written = stdout.write_all(format!("{line}\n").as_bytes()).await;
            if written.is_err() || stdout.flush().await.is_err() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::conversation::Role;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("hello /older"), Command::Send("hello /older".to_string()));
        assert_eq!(Command::parse("/older"), Command::Older);
        assert_eq!(
            Command::parse("/attach  shots/launch.png "),
            Command::Attach(PathBuf::from("shots/launch.png"))
        );
        assert_eq!(Command::parse("/attach"), Command::Unknown("/attach".to_string()));
        assert_eq!(Command::parse("/detach"), Command::Detach);
        assert_eq!(Command::parse("/clear"), Command::Clear);
        assert_eq!(Command::parse("/exit"), Command::Quit);
    }

    #[test]
    fn test_render_image_hides_payload() {
        let message = Message::image("1", Role::User, "data:image/png;base64,AAAA", Utc::now());
        let line = render(&message);
        assert!(line.contains("[image, 26 bytes]"));
        assert!(!line.contains("base64"));
    }
}

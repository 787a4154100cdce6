//! Dapur application binary - composition root.
//!
//! 1. Load configuration from TOML
//! 2. Build the chat API gateway and the Gemini backend
//! 3. Fetch the conversation and mount a turn controller on it
//! 4. Answer a pending seed question, then read questions from stdin

mod cli;
mod terminal;

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use dapur_chat::{
    mime_for_path, ChatError, ConversationCache, GeminiBackend, HttpPersistenceGateway,
    InlineAttachment, PersistenceGateway, TurnController, TurnOutcome, UploadedAttachment,
};
use dapur_core::config::DapurConfig;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::cli::CliArgs;
use crate::terminal::{render_turn, Command, TerminalObserver};

/// Print the end of a turn and log failures without ending the session.
fn report(result: Result<Option<TurnOutcome>, ChatError>) {
    match result {
        Ok(Some(TurnOutcome::Answered { .. })) => println!(),
        Ok(Some(TurnOutcome::Refused { answer })) => println!("chef> {answer}"),
        Ok(None) => {}
        Err(ChatError::EmptyMessage) => {}
        Err(ChatError::NothingToRetry) => println!("(nothing to retry)"),
        Err(e) if e.is_recoverable() => {
            println!();
            tracing::warn!(error = %e, "Turn failed");
            if matches!(e, ChatError::Persistence(_)) {
                println!("(answer not saved; type /retry to try again)");
            }
        }
        Err(e) => tracing::error!(error = %e, "Turn failed"),
    }
}

/// Read a local file and register it as the next turn's attachment.
async fn attach(controller: &TurnController, file: &Path, storage_path: Option<String>) {
    if let Err(e) = controller.begin_attachment() {
        tracing::warn!(error = %e, "Cannot attach now");
        return;
    }
    match tokio::fs::read(file).await {
        Ok(bytes) => {
            let uploaded = UploadedAttachment {
                file_path: storage_path.unwrap_or_else(|| file.display().to_string()),
                generation_payload: InlineAttachment::from_bytes(mime_for_path(file), &bytes),
            };
            if let Err(e) = controller.commit_attachment(uploaded) {
                tracing::warn!(error = %e, "Attachment dropped");
            }
        }
        Err(e) => {
            tracing::warn!(path = %file.display(), error = %e, "Failed to read attachment");
            let _ = controller.fail_attachment(&e.to_string());
        }
    }
}

/// Refetch a conversation whenever its cache entry is invalidated.
fn spawn_refetch(cache: &ConversationCache, gateway: Arc<HttpPersistenceGateway>) {
    let mut events = cache.subscribe();
    tokio::spawn(async move {
        while let Ok(key) = events.recv().await {
            let Some(conversation_id) = key.segments().get(1).cloned() else {
                continue;
            };
            match gateway.load_conversation(&conversation_id).await {
                Ok(conversation) => tracing::debug!(
                    conversation_id = %conversation_id,
                    turns = conversation.history.len(),
                    "Conversation refetched"
                ),
                Err(e) => tracing::debug!(error = %e, "Conversation refetch failed"),
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config is read before tracing exists; its outcome is logged below.
    let config_file = args.resolve_config_path();
    let (mut config, load_error) = match DapurConfig::load(&config_file) {
        Ok(config) => (config, None),
        Err(e) => (DapurConfig::default(), Some(e)),
    };

    // Tracing goes to stderr so answers on stdout stay clean.
    let filter = args.resolve_log_level(&config.general.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&filter)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Starting Dapur v{}", env!("CARGO_PKG_VERSION"));
    match load_error {
        None => tracing::info!(path = %config_file.display(), "Configuration loaded"),
        Some(e) => tracing::warn!(
            path = %config_file.display(),
            error = %e,
            "Failed to load config, using defaults"
        ),
    }

    config.persistence.api_url = args.resolve_api_url(&config.persistence.api_url);
    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "Invalid configuration");
        return Err(e.into());
    }

    // Collaborators.
    let cache = Arc::new(ConversationCache::new());
    let gateway = Arc::new(HttpPersistenceGateway::new(
        &config.persistence,
        Arc::clone(&cache),
    )?);
    let backend = Arc::new(GeminiBackend::from_config(&config.generation)?);
    tracing::info!(
        api_url = %config.persistence.api_url,
        model = %config.generation.model,
        "Collaborators ready"
    );

    let conversation = match gateway.load_conversation(&args.conversation).await {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(
                conversation_id = %args.conversation,
                error = %e,
                "Failed to load conversation"
            );
            return Err(e.into());
        }
    };
    spawn_refetch(&cache, Arc::clone(&gateway));

    for turn in conversation.turns() {
        println!("{}", render_turn(&turn));
    }

    let controller = TurnController::mount(&config, &conversation, backend, gateway)?
        .with_observer(Arc::new(TerminalObserver));

    report(controller.resume().await);

    // === Conversation loop ===

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match Command::parse(&line) {
            Command::Empty => {}
            Command::Quit => break,
            Command::Ask(question) => report(controller.submit(&question).await.map(Some)),
            Command::Retry => match controller.retry_persistence().await {
                Ok(()) => println!("(saved)"),
                Err(e) => report(Err(e)),
            },
            Command::Attach { file, storage_path } => {
                attach(&controller, &file, storage_path).await;
            }
            Command::Unknown(input) => {
                println!("unknown command: {input}");
                println!("commands: /attach <file> [storage-path], /retry, /quit");
            }
        }
    }

    controller.teardown();
    tracing::info!("Goodbye");
    Ok(())
}

use std::io::{self, Write};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use driver_context::{ContextAssembler, NoOpenContext, NoRetrieval, WorkspaceFileResolver};
use driver_core::{ContextItem, TranscriptView};
use driver_session::config::{ENV_API_BASE, ENV_API_TOKEN, ENV_DATA_DIR, ENV_ORG, ENV_USER_ID};
use driver_session::{
    AuthState, AuthStatus, ChatHistory, ChatInput, ChatNotice, ChatSessionController,
    ControllerDeps, DriverConfig, HistoryWriter, JsonFileStore, TurnOutcome,
};
use driver_stream::{HttpChatClient, StaticCredentials};
use log::LevelFilter;
use tokio::sync::oneshot;

#[derive(Parser)]
#[command(name = "driver-chat")]
#[command(about = "Chat with the Driver assistant from the terminal")]
#[command(version)]
struct Cli {
    /// Chat service base URL
    #[arg(long, env = ENV_API_BASE)]
    api_base: Option<String>,

    /// Bearer token for the chat service
    #[arg(long, env = ENV_API_TOKEN, hide_env_values = true)]
    token: Option<String>,

    #[arg(long, env = ENV_ORG)]
    org: Option<String>,

    #[arg(long, env = ENV_USER_ID)]
    user: Option<String>,

    /// Where chat history is stored
    #[arg(long, env = ENV_DATA_DIR)]
    data_dir: Option<std::path::PathBuf>,

    /// Continue a saved session
    #[arg(long)]
    session: Option<String>,

    /// Enable debug logging
    #[arg(long, short, default_value = "false")]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a single message and print the reply
    Ask {
        message: String,
        /// Files to attach as context
        #[arg(long = "file", short = 'f')]
        files: Vec<String>,
    },
    /// Start interactive chat
    Chat,
    /// List saved sessions
    History,
    /// Print a saved session
    Show { id: String },
    /// Delete a saved session
    Delete { id: String },
    /// Delete all saved sessions
    Clear,
}

fn init_logging(debug: bool) {
    let mut builder = env_logger::Builder::new();
    if std::env::var("RUST_LOG").is_ok() {
        builder.parse_default_env();
    } else if debug {
        builder
            .filter_level(LevelFilter::Info)
            .filter_module("driver_cli", LevelFilter::Debug)
            .filter_module("driver_context", LevelFilter::Debug)
            .filter_module("driver_core", LevelFilter::Debug)
            .filter_module("driver_session", LevelFilter::Debug)
            .filter_module("driver_stream", LevelFilter::Debug);
    } else {
        builder.filter_level(LevelFilter::Warn);
    }
    builder.init();
}

fn load_config(cli: &Cli) -> DriverConfig {
    let mut config = DriverConfig::load();
    if let Some(api_base) = &cli.api_base {
        config.api_base = api_base.clone();
    }
    if let Some(token) = &cli.token {
        config.api_token = Some(token.clone());
    }
    if let Some(org) = &cli.org {
        config.organization = Some(org.clone());
    }
    if let Some(user) = &cli.user {
        config.user_id = Some(user.clone());
    }
    if let Some(data_dir) = &cli.data_dir {
        config.data_dir = Some(data_dir.clone());
    }
    config
}

async fn build_controller(
    config: &DriverConfig,
) -> anyhow::Result<(Arc<ChatSessionController>, AuthState)> {
    let store = JsonFileStore::new(config.data_dir());
    store.init().await?;
    log::debug!("History stored under {}", store.base_path().display());
    let history = HistoryWriter::spawn(Arc::new(ChatHistory::new(Arc::new(store))));

    let credentials =
        Arc::new(StaticCredentials::new(config.api_token.clone()).with_env_var(ENV_API_TOKEN));
    let chat_api = HttpChatClient::new(config.api_base.clone(), credentials.clone())
        .with_chat_path(config.chat_path.clone());
    log::debug!("Chat endpoint: {}", chat_api.endpoint());

    let resolver =
        WorkspaceFileResolver::new(config.max_context_bytes).with_root(std::env::current_dir()?);
    let assembler = ContextAssembler::new(
        Arc::new(resolver),
        Arc::new(NoOpenContext),
        Arc::new(NoRetrieval),
    );

    let status = match config.identity() {
        Some(identity) => AuthStatus::SignedIn(identity),
        None => {
            log::warn!("No organization/user configured; history will not be saved");
            AuthStatus::SignedOut
        }
    };
    let auth = AuthState::new(status);

    let controller = Arc::new(ChatSessionController::new(ControllerDeps {
        chat_api: Arc::new(chat_api),
        credentials,
        assembler,
        history,
        auth: auth.subscribe(),
        default_root_node_id: config.default_root_node_id.clone(),
    }));
    controller.spawn_auth_listener();
    Ok((controller, auth))
}

/// Prints the reply as it streams in. Returns once the turn ends.
async fn run_turn(
    controller: &Arc<ChatSessionController>,
    input: ChatInput,
) -> anyhow::Result<()> {
    let mut view_rx = controller.subscribe();
    let mut notices = controller.subscribe_notices();
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
    let printer = tokio::spawn(async move {
        let mut printed = String::new();
        loop {
            let stopping = tokio::select! {
                changed = view_rx.changed() => changed.is_err(),
                _ = &mut stop_rx => true,
            };
            let streamed = streamed_text(&view_rx.borrow_and_update());
            if let Some(text) = streamed {
                if let Some(update) = terminal_update(&printed, &text) {
                    print!("{}", update);
                    let _ = io::stdout().flush();
                }
                printed = text;
            }
            if stopping {
                break;
            }
        }
    });

    let turn = controller.submit(input);
    tokio::pin!(turn);
    let outcome = tokio::select! {
        outcome = &mut turn => outcome,
        _ = tokio::signal::ctrl_c() => {
            controller.abort();
            turn.await
        }
    };
    let _ = stop_tx.send(());
    let _ = printer.await;
    println!();

    while let Ok(notice) = notices.try_recv() {
        match notice {
            ChatNotice::AuthenticationFailed(message) => {
                eprintln!("{}", format!("Authentication failed: {}", message).red());
                eprintln!("{}", format!("Set {} and try again", ENV_API_TOKEN).dimmed());
            }
            ChatNotice::Error(message) => log::debug!("Turn error: {}", message),
        }
    }

    match outcome {
        TurnOutcome::Completed => {
            let view = controller.view();
            if let Some(reply) = view
                .transcript
                .interactions
                .last()
                .and_then(|i| i.assistant_message.as_ref())
            {
                log::debug!("Final reply: {} chars", reply.text.len());
            }
        }
        TurnOutcome::Failed(error) => eprintln!("{}", format!("Error: {}", error).red()),
        TurnOutcome::Aborted => eprintln!("{}", "Aborted".yellow()),
    }
    controller.flush().await?;
    Ok(())
}

/// What to print to move the terminal from `printed` to `text`. A final
/// answer that does not extend the streamed chunks is reprinted in full on a
/// fresh line.
fn terminal_update(printed: &str, text: &str) -> Option<String> {
    if text == printed {
        return None;
    }
    match text.strip_prefix(printed) {
        Some(rest) => Some(rest.to_string()),
        None => Some(format!("\n{}", text)),
    }
}

fn streamed_text(view: &TranscriptView) -> Option<String> {
    if let Some(in_progress) = &view.message_in_progress {
        return Some(in_progress.text.clone());
    }
    view.transcript
        .interactions
        .last()
        .and_then(|i| i.assistant_message.as_ref())
        .filter(|m| !m.is_error())
        .map(|m| m.text.clone())
}

async fn run_interactive_chat(controller: &Arc<ChatSessionController>) -> anyhow::Result<()> {
    println!("{}", "Driver chat".cyan().bold());
    println!("{}", format!("Session ID: {}", controller.session_id()).dimmed());
    println!("{}", "Empty line to leave, Ctrl-C aborts a reply".dimmed());
    println!();

    loop {
        print!("{} ", "You:".cyan().bold());
        io::stdout().flush()?;

        let mut line = String::new();
        if io::stdin().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            break;
        }

        println!("{}", "Assistant:".green().bold());
        run_turn(controller, ChatInput::new(line)).await?;
        println!();
    }
    Ok(())
}

async fn print_history(controller: &ChatSessionController) -> anyhow::Result<()> {
    let sessions = controller.history().await?;
    if sessions.is_empty() {
        println!("{}", "No saved sessions".dimmed());
        return Ok(());
    }
    for summary in sessions {
        println!(
            "{}  {}  {} ({} messages)",
            summary.id.dimmed(),
            summary.last_interaction_timestamp.format("%Y-%m-%d %H:%M"),
            summary.title,
            summary.interaction_count
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let config = load_config(&cli);
    let (controller, _auth) = build_controller(&config).await?;

    if let Some(id) = &cli.session {
        controller.restore(id).await?;
    }

    match cli.command {
        Commands::Ask { message, files } => {
            let mentions = files.into_iter().map(ContextItem::file).collect();
            run_turn(&controller, ChatInput::new(message).with_mentions(mentions)).await?;
        }
        Commands::Chat => run_interactive_chat(&controller).await?,
        Commands::History => print_history(&controller).await?,
        Commands::Show { id } => {
            let transcript = controller.load_session(&id).await?;
            println!("{}", serde_json::to_string_pretty(&transcript)?);
        }
        Commands::Delete { id } => {
            controller.delete_session(&id);
            controller.flush().await?;
        }
        Commands::Clear => {
            controller.clear_history();
            controller.flush().await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streamed_chunks_print_only_the_new_suffix() {
        assert_eq!(terminal_update("", "Hi"), Some("Hi".to_string()));
        assert_eq!(terminal_update("Hi", "Hi there"), Some(" there".to_string()));
        assert_eq!(terminal_update("Hi there", "Hi there"), None);
    }

    #[test]
    fn diverging_final_answer_is_reprinted() {
        assert_eq!(terminal_update("Hi", "Hello"), Some("\nHello".to_string()));
    }
}

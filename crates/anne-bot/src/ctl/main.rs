//! anne-botctl - terminal client for the Anne Bot server
//!
//! Plays the browser's part: keeps local storage in a JSON file, signs users
//! in and out, and chats through the same session logic as the web client.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};

use anne_bot::client::{
    AuthProvider, AuthStatus, AuthUser, ChatApi, FileStore, HttpChatApi, LocalAuth, LocalStore,
    SessionManager,
};
use anne_bot::codec::{self, ImageData};
use anne_bot::memory::{Message, MessageRole};

const DEFAULT_SERVER_URL: &str = "http://localhost:3000";

fn main() -> ExitCode {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "Error: {err:?}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

#[tokio::main]
async fn try_main() -> Result<()> {
    let cli = Cli::parse();
    let api = Arc::new(HttpChatApi::new(&cli.server));

    let state_path = match cli.state {
        Some(path) => path,
        None => default_state_file()?,
    };
    let store: Arc<dyn LocalStore> = Arc::new(FileStore::open(&state_path)?);
    let auth = LocalAuth::new(store.clone());
    let status = auth.restore();
    let manager = SessionManager::new(api.clone(), store);

    match cli.command {
        Command::Login { user_id, email } => {
            auth.sign_in(AuthUser { id: user_id, email }).await?;
            manager.on_auth_change(&auth.status()).await;
            print_session(&manager, cli.json)
        }
        Command::Logout => {
            auth.sign_out().await?;
            manager.on_auth_change(&auth.status()).await;
            print_session(&manager, cli.json)
        }
        command => {
            manager.on_auth_change(&status).await;
            run(command, &manager, &api, &status, cli.json).await
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "anne-botctl",
    author,
    version,
    about = "Terminal client for the Anne Bot chat server."
)]
struct Cli {
    /// Anne Bot server URL
    #[arg(long, short = 's', default_value = DEFAULT_SERVER_URL, env = "ANNE_BOT_SERVER_URL")]
    server: String,

    /// Local storage file (defaults to the user state directory)
    #[arg(long, global = true, value_name = "PATH")]
    state: Option<PathBuf>,

    /// Output machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check server status
    Status,

    /// Sign in as a user
    Login {
        user_id: String,
        #[arg(long)]
        email: Option<String>,
    },

    /// Sign out and continue as a guest
    Logout,

    /// Show the active session
    Session,

    /// Send a message and print the streamed reply
    Chat {
        /// Message text (the prompt when an image is attached)
        #[arg(default_value = "")]
        message: String,

        /// Attach an image file
        #[arg(long, short = 'i', value_name = "PATH")]
        image: Option<PathBuf>,
    },

    /// Print the history of the active thread
    History,

    /// Start a new thread
    New,

    /// Clear the active conversation on the server
    Reset,

    /// Manage threads (signed-in users only)
    Threads {
        #[command(subcommand)]
        command: ThreadsCommand,
    },
}

#[derive(Debug, Subcommand)]
enum ThreadsCommand {
    /// List threads, most recent first
    List,
    /// Switch to a thread
    Select { thread_id: String },
    /// Rename a thread
    Rename { thread_id: String, title: String },
    /// Delete a thread and its history
    Delete { thread_id: String },
}

async fn run(
    command: Command,
    manager: &SessionManager,
    api: &HttpChatApi,
    status: &AuthStatus,
    json: bool,
) -> Result<()> {
    match command {
        Command::Status => handle_status(api, json).await,
        Command::Session => print_session(manager, json),
        Command::Chat { message, image } => handle_chat(manager, &message, image, json).await,
        Command::History => print_messages(&manager.messages(), json),
        Command::New => {
            manager.new_thread().await?;
            print_session(manager, json)
        }
        Command::Reset => {
            let session_id = manager
                .session_id()
                .ok_or_else(|| anyhow!("no active session"))?;
            let user_id = manager.identity().and_then(|i| i.user_id().map(str::to_string));
            api.reset(session_id.as_str(), user_id.as_deref()).await?;
            println!("Reset {}", session_id);
            Ok(())
        }
        Command::Threads { command } => handle_threads(manager, status, command, json).await,
        Command::Login { .. } | Command::Logout => Ok(()),
    }
}

async fn handle_status(api: &HttpChatApi, json: bool) -> Result<()> {
    match api.health().await {
        Ok(health) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&health)?);
            } else {
                let version = health
                    .get("version")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown");
                println!("Server is running at {} (v{})", api.base_url(), version);
            }
        }
        Err(e) => {
            if json {
                println!(
                    "{}",
                    serde_json::json!({ "status": "error", "error": e.to_string() })
                );
            } else {
                println!("Server at {} is not healthy: {}", api.base_url(), e);
            }
        }
    }
    Ok(())
}

async fn handle_chat(
    manager: &SessionManager,
    message: &str,
    image: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let print_delta = |delta: &str| {
        if !json {
            print!("{delta}");
            let _ = io::stdout().flush();
        }
    };

    let reply = match image {
        Some(path) => {
            manager.stage_image(load_image(&path)?)?;
            manager.send_staged_image(message, print_delta).await?
        }
        None => {
            if message.trim().is_empty() {
                bail!("message is empty");
            }
            manager.send_with(message, print_delta).await?
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&reply)?);
    } else {
        println!();
    }
    Ok(())
}

fn load_image(path: &Path) -> Result<ImageData> {
    let mime = mime_guess::from_path(path)
        .first()
        .filter(|mime| mime.type_() == mime_guess::mime::IMAGE)
        .ok_or_else(|| anyhow!("{} is not an image file", path.display()))?;
    let bytes =
        std::fs::read(path).with_context(|| format!("reading image {}", path.display()))?;
    Ok(ImageData::from_bytes(mime.essence_str(), bytes))
}

async fn handle_threads(
    manager: &SessionManager,
    status: &AuthStatus,
    command: ThreadsCommand,
    json: bool,
) -> Result<()> {
    let AuthStatus::SignedIn(user) = status else {
        bail!("sign in first (anne-botctl login <user-id>)");
    };
    let book = manager.threads();

    match command {
        ThreadsCommand::List => {
            let summaries = book.refresh(&user.id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summaries)?);
                return Ok(());
            }
            if summaries.is_empty() {
                println!("No threads");
                return Ok(());
            }
            let active = manager.session_id();
            for summary in summaries {
                let marker = if active.as_ref().map(|id| id.as_str())
                    == Some(summary.thread_id.as_str())
                {
                    "*"
                } else {
                    " "
                };
                println!(
                    "{} {}  {} ({} messages)\n    {}",
                    marker,
                    summary.thread_id,
                    summary.title,
                    summary.message_count,
                    summary.last_message
                );
            }
            Ok(())
        }
        ThreadsCommand::Select { thread_id } => {
            manager.select_thread(&thread_id).await?;
            print_messages(&manager.messages(), json)
        }
        ThreadsCommand::Rename { thread_id, title } => {
            book.rename(&user.id, &thread_id, &title).await?;
            println!("Renamed {}", thread_id);
            Ok(())
        }
        ThreadsCommand::Delete { thread_id } => {
            manager.delete_thread(&thread_id).await?;
            println!("Deleted {}", thread_id);
            Ok(())
        }
    }
}

fn print_session(manager: &SessionManager, json: bool) -> Result<()> {
    let snapshot = manager.snapshot();
    let user = manager
        .identity()
        .and_then(|i| i.user_id().map(str::to_string));

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "state": snapshot.state,
                "sessionId": snapshot.session_id,
                "userId": user,
                "messages": snapshot.messages.len(),
            }))?
        );
    } else {
        println!("User:     {}", user.as_deref().unwrap_or("guest"));
        match snapshot.session_id {
            Some(id) => println!("Session:  {}", id),
            None => println!("Session:  -"),
        }
        println!("Messages: {}", snapshot.messages.len());
    }
    Ok(())
}

fn print_messages(messages: &[Message], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(messages)?);
        return Ok(());
    }
    if messages.is_empty() {
        println!("No messages");
    }
    for message in messages {
        let who = match message.role {
            MessageRole::User => "you",
            MessageRole::Assistant => "あん",
            MessageRole::System => "system",
        };
        let content = codec::decode(&message.content);
        if content.has_image() {
            println!("{}: {} [image]", who, content.text());
        } else {
            println!("{}: {}", who, content.text());
        }
    }
    Ok(())
}

fn default_state_file() -> Result<PathBuf> {
    let dir = dirs::state_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".local").join("state")))
        .ok_or_else(|| anyhow!("unable to determine state directory"))?;
    Ok(dir.join("anne-bot").join("client.json"))
}

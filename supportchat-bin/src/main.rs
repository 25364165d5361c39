use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use clap::{Parser, Subcommand};
use supportchat_core::{
    assistant::AssistantEndpoint,
    config::{ChatCfg, Config, StoreKind},
    conversation::Conversation,
    error::ChatError,
    http_client::HttpClient,
    model::{Role, UserIdentity},
    source::{CannedSource, ReplySource},
    store::{HistoryStore, MemoryStore, RestStore},
    transcript::{ChangeKind, EntryId, TranscriptEvent, TranscriptSubscriber},
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

/// Optional bearer token of the signed-in user, used for history requests.
const ACCESS_TOKEN_ENV: &str = "SUPPORTCHAT_ACCESS_TOKEN";

#[derive(Parser)]
#[command(author, version, about = "support chat client", long_about = None)]
struct Cli {
    /// Config file (TOML or JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Use the canned reply and an in-memory history; no backend needed
    #[arg(long, global = true)]
    offline: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat; Ctrl-C cancels the reply being streamed
    Chat {
        #[arg(long, help = "Signed-in user id; enables saved history")]
        user: Option<String>,
    },
    /// Send one message and print the reply
    Send {
        #[arg(short, long, help = "Message from the user")]
        message: String,
        #[arg(long)]
        user: Option<String>,
    },
    /// Print the saved messages of a user
    History {
        #[arg(long)]
        user: String,
    },
}

/// Everything a command needs, resolved from flags and config.
struct App {
    chat: ChatCfg,
    source: Arc<dyn ReplySource>,
    store: Option<Arc<dyn HistoryStore>>,
}

impl App {
    fn build(cli: &Cli) -> anyhow::Result<Self> {
        let cfg = cli.config.as_ref().map(Config::from_path).transpose()?;
        if cli.offline {
            return Ok(Self {
                chat: cfg.map(|c| c.chat).unwrap_or_default(),
                source: Arc::new(CannedSource::default()),
                store: Some(Arc::new(MemoryStore::new())),
            });
        }
        let Some(cfg) = cfg else {
            anyhow::bail!("no backend configured: pass --config PATH or --offline");
        };
        let http = HttpClient::from_cfg(&cfg.http)?;
        let source: Arc<dyn ReplySource> = Arc::new(AssistantEndpoint::from_config(&cfg, http.clone())?);
        let store: Option<Arc<dyn HistoryStore>> = match cfg.store.kind {
            StoreKind::Memory => Some(Arc::new(MemoryStore::new())),
            StoreKind::Rest => Some(Arc::new(RestStore::from_config(&cfg, http)?)),
            StoreKind::None => None,
        };
        Ok(Self {
            chat: cfg.chat,
            source,
            store,
        })
    }

    async fn conversation(&self, user: Option<String>) -> anyhow::Result<Conversation> {
        let mut conv = Conversation::new(self.source.clone(), &self.chat);
        if let (Some(user), Some(store)) = (user, &self.store) {
            let loaded = conv.attach_history(store.clone(), identity(user)).await?;
            tracing::debug!(loaded, "history loaded");
        }
        Ok(conv)
    }
}

fn identity(user: String) -> UserIdentity {
    let id = UserIdentity::new(user);
    match std::env::var(ACCESS_TOKEN_ENV) {
        Ok(tok) if !tok.trim().is_empty() => id.with_access_token(tok.into()),
        _ => id,
    }
}

/// Writes assistant text to stdout as it grows.
#[derive(Default)]
struct LivePrinter {
    // entry being printed and how many bytes of it are already out
    cursor: Mutex<Option<(EntryId, usize)>>,
}

impl TranscriptSubscriber for LivePrinter {
    fn notify(&self, event: &TranscriptEvent) {
        if event.entry.role != Role::Assistant {
            return;
        }
        let mut cursor = self.cursor.lock().unwrap_or_else(|e| e.into_inner());
        let printed = match (*cursor, event.kind) {
            (Some((id, n)), ChangeKind::Updated) if id == event.entry.id => n,
            _ => {
                print!("asistente> ");
                0
            }
        };
        let text = &event.entry.text;
        if let Some(rest) = text.get(printed..) {
            print!("{rest}");
        }
        io::stdout().flush().ok();
        *cursor = Some((event.entry.id, text.len()));
    }
}

fn report(err: &ChatError) {
    match err.user_message() {
        Some(notice) => eprintln!("\n[{notice}]"),
        None => eprintln!("\n[error: {err}]"),
    }
}

fn print_entries(conv: &Conversation) {
    for e in conv.snapshot() {
        let who = match e.role {
            Role::User => "tú",
            Role::Assistant => "asistente",
        };
        println!("{who}> {}", e.text);
    }
}

/// Cancels the exchange in flight on Ctrl-C; the exchange then finishes with
/// `Cancelled` on its own, so this never resolves.
async fn cancel_on_ctrl_c(conv: &Conversation) -> Result<supportchat_core::conversation::Reply, ChatError> {
    if tokio::signal::ctrl_c().await.is_ok() {
        conv.cancel_current();
    }
    std::future::pending().await
}

async fn run_chat(app: &App, user: Option<String>) -> anyhow::Result<()> {
    let conv = app.conversation(user).await?;
    print_entries(&conv);
    conv.subscribe(Arc::new(LivePrinter::default()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("tú> ");
        io::stdout().flush().ok();
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let result = tokio::select! {
            r = conv.send(&line) => r,
            r = cancel_on_ctrl_c(&conv) => r,
        };
        match result {
            Ok(_) => println!(),
            Err(ChatError::Cancelled) => eprintln!("\n[cancelled]"),
            Err(e) => report(&e),
        }
    }
    Ok(())
}

async fn run_send(app: &App, message: &str, user: Option<String>) -> anyhow::Result<()> {
    let conv = app.conversation(user).await?;
    match conv.send(message).await {
        Ok(reply) => {
            println!("{}", reply.text);
            Ok(())
        }
        Err(e) => {
            report(&e);
            Err(e.into())
        }
    }
}

async fn run_history(app: &App, user: String) -> anyhow::Result<()> {
    let Some(store) = &app.store else {
        anyhow::bail!("history is disabled (store.kind = \"none\")");
    };
    let user = identity(user);
    let session = store.ensure_session(&user).await?;
    let messages = store.list_messages(&user, &session.id).await?;
    println!("session {} ({} messages)", session.id, messages.len());
    for m in messages {
        println!("{} {}> {}", m.created_at.format("%Y-%m-%d %H:%M"), m.role.as_str(), m.content);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let app = App::build(&cli)?;

    match cli.command {
        Commands::Chat { user } => run_chat(&app, user).await,
        Commands::Send { message, user } => run_send(&app, &message, user).await,
        Commands::History { user } => run_history(&app, user).await,
    }
}

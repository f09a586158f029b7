//! Command-line interface parsing and handling
//!
//! This module handles parsing command-line arguments and executing the appropriate commands.

pub mod chat;

use std::error::Error;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::api::client::ApiClient;
use crate::auth::{KeyringCredentials, StaticCredentials};
use crate::cli::chat::{run_chat, ChatOptions};
use crate::core::config::{Config, ConfigKey};
use crate::core::error::{ApiError, Severity};
use crate::core::notify::{CallOptions, CredentialStore, ErrorReporter, Notice, Notifier};

pub const LOG_ENV_VAR: &str = "CAUSETTE_LOG";

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "\ncommit: ",
    env!("VERGEN_GIT_SHA"),
    "\ndescribe: ",
    env!("VERGEN_GIT_DESCRIBE"),
    "\nbuilt: ",
    env!("VERGEN_BUILD_DATE"),
);

#[derive(Parser, Debug)]
#[command(name = "causette", version, long_version = LONG_VERSION)]
#[command(about = "A terminal chat client for streaming agent services")]
#[command(
    long_about = "Causette talks to an agent service that streams its replies as \
sections of text and tool output, and that pauses to ask before it uses tools \
such as sending email.\n\n\
Authentication:\n\
  Use 'causette auth' to store a bearer token in your system keyring.\n\n\
Environment Variables:\n\
  CAUSETTE_BASE_URL  Service URL (defaults to http://localhost:8000/api)\n\
  CAUSETTE_TOKEN     Bearer token used when the keyring has none\n\
  CAUSETTE_LOG       Diagnostic log filter, e.g. 'causette=debug' (defaults to warn)\n\n\
Controls:\n\
  Enter             Send the message\n\
  Ctrl+C            Stop a streaming reply, or quit at the prompt\n\n\
Commands:\n\
  /help             List chat commands\n\
  /log <filename>   Enable logging to specified file\n\
  /log              Toggle logging pause/resume"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Service URL, overriding the config file and CAUSETTE_BASE_URL
    #[arg(short = 'u', long, global = true, value_name = "URL")]
    pub base_url: Option<String>,

    /// Bearer token for this run only; nothing is stored
    #[arg(long, global = true, value_name = "TOKEN")]
    pub token: Option<String>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Start the chat interface (default)
    Chat {
        /// Session to open instead of the configured default
        #[arg(short, long)]
        session: Option<String>,
        /// Enable logging to specified file
        #[arg(short = 'l', long)]
        log: Option<String>,
    },
    /// List sessions
    Sessions,
    /// Create a session
    New {
        /// Title for the session (can be multiple words)
        #[arg(trailing_var_arg = true)]
        title: Vec<String>,
    },
    /// Delete a session
    Delete {
        /// Session id
        id: String,
    },
    /// Store a bearer token for the service in the system keyring
    Auth,
    /// Remove the stored bearer token
    Deauth,
    /// Set configuration values, or print them when no value is given
    Set {
        /// Configuration key to set
        key: Option<String>,
        /// Value to set for the key
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        value: Vec<String>,
    },
    /// Unset configuration values
    Unset {
        /// Configuration key to unset
        key: String,
    },
}

pub fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();
    tokio::runtime::Runtime::new()?.block_on(async_main(Args::parse()))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

async fn async_main(mut args: Args) -> Result<(), Box<dyn Error>> {
    let command = args.command.take().unwrap_or(Commands::Chat {
        session: None,
        log: None,
    });
    match command {
        Commands::Set { key, value } => set_config(key, value),
        Commands::Unset { key } => unset_config(&key),
        Commands::Auth => {
            let base_url = resolve_base_url(&args)?;
            store_token(&KeyringCredentials::new(base_url), io::stdin().lock())
        }
        Commands::Deauth => {
            let base_url = resolve_base_url(&args)?;
            let credentials = KeyringCredentials::new(base_url);
            if credentials.remove_token()? {
                println!("✅ Removed token for {}", credentials.account());
            } else {
                println!("No token stored for {}", credentials.account());
            }
            Ok(())
        }
        Commands::Sessions => {
            let connection = Connection::open(&args)?;
            let config = Config::load()?;
            let sessions = connection.client.list_sessions().await.map_err(|err| {
                connection.fail(err, "Failed to load sessions")
            })?;
            if sessions.is_empty() {
                println!("No sessions yet. Create one with 'causette new'.");
            }
            for session in sessions {
                let marker = if config.default_session.as_deref() == Some(session.id.as_str()) {
                    '*'
                } else {
                    ' '
                };
                let preview = session.last_message.unwrap_or_default();
                println!("{marker} {}  {}  {}", session.id, session.title, one_line(&preview, 60));
            }
            Ok(())
        }
        Commands::New { title } => {
            let connection = Connection::open(&args)?;
            let title = if title.is_empty() {
                "New session".to_string()
            } else {
                title.join(" ")
            };
            let record = connection
                .client
                .create_session(&title)
                .await
                .map_err(|err| connection.fail(err, "Failed to create session"))?;
            println!("✅ Created session {} ({})", record.id, record.title);
            Ok(())
        }
        Commands::Delete { id } => {
            let connection = Connection::open(&args)?;
            connection
                .client
                .delete_session(&id)
                .await
                .map_err(|err| connection.fail(err, "Failed to delete session"))?;
            Config::mutate(|config| {
                if config.default_session.as_deref() == Some(id.as_str()) {
                    config.default_session = None;
                }
                Ok(())
            })?;
            println!("✅ Deleted session {id}");
            Ok(())
        }
        Commands::Chat { session, log } => {
            let connection = Connection::open(&args)?;
            let config = Config::load()?;
            run_chat(
                connection.client,
                connection.credentials,
                ChatOptions {
                    session: session.or(config.default_session.clone()),
                    log_file: log,
                    idle_timeout: config.stream_idle_timeout(),
                },
            )
            .await
        }
    }
}

fn resolve_base_url(args: &Args) -> Result<String, Box<dyn Error>> {
    match &args.base_url {
        Some(url) => Ok(url.trim_end_matches('/').to_string()),
        None => Ok(Config::load()?.effective_base_url()),
    }
}

/// The client and credential holder a networked subcommand runs with.
struct Connection {
    client: Arc<ApiClient>,
    credentials: Arc<dyn CredentialStore>,
}

impl Connection {
    fn open(args: &Args) -> Result<Self, Box<dyn Error>> {
        let config = Config::load()?;
        let base_url = resolve_base_url(args)?;
        let credentials: Arc<dyn CredentialStore> = match &args.token {
            Some(token) => Arc::new(StaticCredentials::new(token.trim())),
            None => Arc::new(KeyringCredentials::new(base_url.clone())),
        };
        if credentials.bearer().is_none() {
            eprintln!("⚠️  No token for {base_url}; run 'causette auth' or set CAUSETTE_TOKEN.");
        }
        let client = ApiClient::new(base_url, credentials.clone(), config.request_timeout());
        Ok(Self {
            client: Arc::new(client),
            credentials,
        })
    }

    /// Applies the failure policy for a one-shot subcommand and hands the
    /// error back for the exit status.
    fn fail(&self, err: ApiError, message: &str) -> Box<dyn Error> {
        ErrorReporter::new(Arc::new(StderrNotifier), self.credentials.clone())
            .report(&err, &CallOptions::with_message(message));
        Box::new(err)
    }
}

/// Prints notifications to stderr.
pub struct StderrNotifier;

impl Notifier for StderrNotifier {
    fn notify(&self, notice: Notice) {
        let icon = match notice.severity {
            Severity::Warning => "⚠️ ",
            Severity::Error => "❌",
        };
        eprintln!("{icon} {}: {}", notice.title, notice.message);
    }
}

fn store_token(credentials: &KeyringCredentials, input: impl BufRead) -> Result<(), Box<dyn Error>> {
    eprint!("Paste the bearer token for {}: ", credentials.account());
    io::stderr().flush()?;
    let token = read_token(input)?;
    credentials.store_token(&token)?;
    println!("✅ Token stored for {}", credentials.account());
    Ok(())
}

fn read_token(mut input: impl BufRead) -> Result<String, Box<dyn Error>> {
    let mut line = String::new();
    input.read_line(&mut line)?;
    let token = line.trim();
    if token.is_empty() {
        return Err("No token provided".into());
    }
    Ok(token.to_string())
}

fn set_config(key: Option<String>, value: Vec<String>) -> Result<(), Box<dyn Error>> {
    let Some(key) = key else {
        Config::load()?.print_all();
        return Ok(());
    };
    let key: ConfigKey = key.parse()?;
    if value.is_empty() {
        Config::load()?.print_all();
        return Ok(());
    }
    let value = value.join(" ");
    Config::mutate(|config| {
        config.set_value(key, &value)?;
        Ok(())
    })?;
    println!("✅ Set {} to: {value}", key.name());
    Ok(())
}

fn unset_config(key: &str) -> Result<(), Box<dyn Error>> {
    let key: ConfigKey = key.parse()?;
    Config::mutate(|config| {
        config.unset_value(key);
        Ok(())
    })?;
    println!("✅ Unset {}", key.name());
    Ok(())
}

/// Collapses whitespace and truncates to `max` characters.
pub(crate) fn one_line(text: &str, max: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max {
        return collapsed;
    }
    let mut truncated: String = collapsed.chars().take(max.saturating_sub(1)).collect();
    truncated.push('…');
    truncated
}

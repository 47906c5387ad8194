use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use ask_api::{AskApiClient, AskEvent};
use ask_stream::logging::init_tracing;
use ask_stream::{AskObserver, EnvConfig, SessionCoordinator};
use clap::{Parser, Subcommand};
use history_store::{HistoryStore, JsonFileHistoryStore};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "ask")]
#[command(version, about = "Ask a question and stream the answer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Service origin (env: BACKEND_URL, default http://localhost:8080)
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Bearer token (env: BACKEND_AUTH_TOKEN)
    #[arg(long, global = true)]
    auth_token: Option<String>,

    /// API key sent as x-api-key (env: BACKEND_API_KEY)
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Header and idle timeout in milliseconds, 0 disables (env: BACKEND_TIMEOUT_MS)
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// History file (env: ASK_HISTORY_PATH, default ./.ask/history.json)
    #[arg(long, global = true)]
    history_path: Option<PathBuf>,

    /// Log at info level regardless of RUST_LOG
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream an answer to stdout and save it to history
    Ask {
        question: String,

        /// Correlation id for this exchange (random when omitted)
        #[arg(long)]
        session_id: Option<String>,
    },

    /// Print saved exchanges, most recent first
    History,

    /// Delete all saved exchanges
    ClearHistory,

    /// Probe the service health endpoint
    Health,
}

impl Cli {
    fn env_config(&self) -> EnvConfig {
        let mut config = EnvConfig::from_env();
        if let Some(base_url) = &self.base_url {
            config.base_url = Some(base_url.clone());
        }
        if let Some(token) = &self.auth_token {
            config.auth_token = Some(token.clone());
        }
        if let Some(api_key) = &self.api_key {
            config.api_key = Some(api_key.clone());
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.timeout_ms = Some(timeout_ms);
        }
        if let Some(path) = &self.history_path {
            config.history_path = Some(path.clone());
        }
        config
    }
}

/// Prints deltas as they arrive. A retried attempt starts on a fresh line.
#[derive(Default)]
struct StdoutObserver {
    wrote_text: AtomicBool,
}

impl AskObserver for StdoutObserver {
    fn on_event(&self, _session_id: &str, event: &AskEvent) {
        if let Some(delta) = event.delta_text() {
            let mut stdout = std::io::stdout().lock();
            let _ = stdout.write_all(delta.as_bytes());
            let _ = stdout.flush();
            self.wrote_text.store(true, Ordering::Release);
        }
    }

    fn on_error(&self, _session_id: &str, _message: &str) {}

    fn on_attempt(&self, _session_id: &str, attempt: u32) {
        if attempt > 1 {
            if self.wrote_text.swap(false, Ordering::AcqRel) {
                println!();
            }
            eprintln!("retrying (attempt {attempt})...");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let env = cli.env_config();
    let cwd = std::env::current_dir().context("resolving current directory")?;
    let history: Arc<dyn HistoryStore> =
        Arc::new(JsonFileHistoryStore::new(env.history_path_or_default(&cwd)));

    match cli.command {
        Commands::Ask {
            question,
            session_id,
        } => {
            let session_id = session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
            let observer = Arc::new(StdoutObserver::default());
            let coordinator =
                SessionCoordinator::from_config(env.api_config(), history, observer.clone())
                    .context("building ask client")?;

            let outcome = coordinator.ask(&question, &session_id).await;
            if observer.wrote_text.load(Ordering::Acquire) {
                println!();
            }
            if !outcome.done {
                bail!(outcome
                    .message
                    .unwrap_or_else(|| ask_api::error::GENERIC_FAILURE_MESSAGE.to_owned()));
            }
        }
        Commands::History => {
            for record in history.list().context("reading history")? {
                let when = record
                    .formatted_timestamp()
                    .unwrap_or_else(|_| record.ts.to_string());
                println!("{when}  [{}]", record.id);
                println!("Q: {}", record.question);
                println!("A: {}", record.answer);
                println!();
            }
        }
        Commands::ClearHistory => {
            history.clear().context("clearing history")?;
            println!("history cleared");
        }
        Commands::Health => {
            let client = AskApiClient::new(env.api_config()).context("building ask client")?;
            if !client.health().await.context("probing service health")? {
                bail!("service at {} is unhealthy", client.config().base_url);
            }
            println!("ok");
        }
    }

    Ok(())
}

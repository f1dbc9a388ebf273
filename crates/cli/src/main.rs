mod config;
mod error;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use runtime::{Capability, GenerationRequest, OllamaProvider, Orchestrator};
use serde::Serialize;
use serde_json::json;
use storage::{GroupBy, Message, NewConversation, Store, UsageFilter};
use tracing::info;

use config::Config;
use error::{Error, Result};

#[derive(Parser)]
#[command(name = "modelhub")]
#[command(about = "One generation interface over local and cloud LLMs", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to ./modelhub.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List models across providers
    Models {
        #[arg(short, long)]
        provider: Option<String>,
        /// chat, completion, vision, function_calling, or code
        #[arg(short, long)]
        capability: Option<Capability>,
    },
    /// Show one model's descriptor
    Info {
        model: String,
        #[arg(short, long)]
        provider: String,
    },
    /// Generate text with one model
    Generate {
        #[arg(short, long)]
        provider: String,
        #[arg(short, long)]
        model: String,
        #[arg(long, conflicts_with = "messages", required_unless_present = "messages")]
        prompt: Option<String>,
        /// JSON file holding a list of {role, content} messages
        #[arg(long)]
        messages: Option<PathBuf>,
        #[arg(long)]
        system: Option<String>,
        #[arg(long)]
        max_tokens: Option<u32>,
        #[arg(long, default_value_t = 0.7)]
        temperature: f64,
        #[arg(long, default_value_t = 1.0)]
        top_p: f64,
        #[arg(long)]
        stop: Vec<String>,
        /// Print fragments as they arrive instead of one JSON result
        #[arg(long)]
        stream: bool,
    },
    /// Run one prompt against several models at once
    Compare {
        /// provider/model, repeatable
        #[arg(long = "target", required = true, value_parser = parse_target)]
        targets: Vec<(String, String)>,
        #[arg(long)]
        prompt: String,
        #[arg(long, default_value_t = 0.7)]
        temperature: f64,
    },
    /// Aggregated usage statistics
    Stats {
        #[arg(short, long, default_value = "model")]
        group_by: GroupBy,
    },
    /// Raw usage rows
    Usage {
        #[arg(short, long)]
        model: Option<String>,
        #[arg(short, long)]
        provider: Option<String>,
        /// RFC 3339 lower bound
        #[arg(long)]
        since: Option<DateTime<Utc>>,
        /// RFC 3339 upper bound
        #[arg(long)]
        until: Option<DateTime<Utc>>,
    },
    /// Save (or overwrite) a conversation
    Save {
        #[arg(long)]
        title: String,
        #[arg(long)]
        model: String,
        #[arg(long)]
        provider: String,
        /// JSON file holding a list of {role, content} messages
        #[arg(long)]
        messages: PathBuf,
        /// Existing conversation id to overwrite
        #[arg(long)]
        id: Option<String>,
    },
    /// List saved conversations, most recently updated first
    Conversations {
        #[arg(short, long, default_value_t = 50)]
        limit: u32,
        #[arg(short, long, default_value_t = 0)]
        offset: u32,
    },
    /// Show a saved conversation
    Show { id: String },
    /// Delete a saved conversation
    Delete { id: String },
    /// Probe every configured provider
    Health,
    /// Download a model into the local daemon
    Pull { model: String },
    /// Remove a model from the local daemon
    Rm { model: String },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::resolve(cli.config.as_deref())?;
    init_logging(&config.log_level);

    match cli.command {
        Commands::Models {
            provider,
            capability,
        } => {
            let hub = orchestrator(&config)?;
            print_json(&hub.list_models(provider.as_deref(), capability).await)
        }
        Commands::Info { model, provider } => {
            let hub = orchestrator(&config)?;
            match hub.get_model_info(&model, &provider).await? {
                Some(descriptor) => print_json(&descriptor),
                None => Err(Error::ModelNotFound { model, provider }),
            }
        }
        Commands::Generate {
            provider,
            model,
            prompt,
            messages,
            system,
            max_tokens,
            temperature,
            top_p,
            stop,
            stream,
        } => {
            let mut request = GenerationRequest::new(model)
                .with_temperature(temperature)
                .with_top_p(top_p)
                .with_stop_sequences(stop);
            request.prompt = prompt;
            request.messages = messages.as_deref().map(read_messages).transpose()?;
            request.system_prompt = system;
            request.max_tokens = max_tokens;
            request.stream = stream;

            let hub = orchestrator(&config)?;
            if stream {
                stream_to_stdout(&hub, &provider, &request).await
            } else {
                print_json(&hub.generate(&provider, &request).await?)
            }
        }
        Commands::Compare {
            targets,
            prompt,
            temperature,
        } => {
            let hub = orchestrator(&config)?;
            print_json(&hub.compare_models(&targets, &prompt, temperature).await)
        }
        Commands::Stats { group_by } => {
            let hub = orchestrator(&config)?;
            print_json(&hub.usage_stats(group_by)?)
        }
        Commands::Usage {
            model,
            provider,
            since,
            until,
        } => {
            let hub = orchestrator(&config)?;
            let filter = UsageFilter {
                model,
                provider,
                since,
                until,
            };
            print_json(&hub.usage_records(&filter)?)
        }
        Commands::Save {
            title,
            model,
            provider,
            messages,
            id,
        } => {
            let hub = orchestrator(&config)?;
            let messages = read_messages(&messages)?;
            let id = hub.save_conversation(NewConversation::new(
                id, title, model, provider, messages,
            ))?;
            print_json(&json!({"conversation_id": id, "status": "saved"}))
        }
        Commands::Conversations { limit, offset } => {
            let hub = orchestrator(&config)?;
            print_json(&hub.list_conversations(limit, offset)?)
        }
        Commands::Show { id } => {
            let hub = orchestrator(&config)?;
            match hub.get_conversation(&id)? {
                Some(conversation) => print_json(&conversation),
                None => Err(Error::ConversationNotFound { id }),
            }
        }
        Commands::Delete { id } => {
            let hub = orchestrator(&config)?;
            let deleted = hub.delete_conversation(&id)?;
            print_json(&json!({"conversation_id": id, "deleted": deleted}))
        }
        Commands::Health => {
            let hub = orchestrator(&config)?;
            print_json(&hub.health_check_all().await)
        }
        Commands::Pull { model } => {
            let status = ollama(&config)?.pull_model(&model).await?;
            print_json(&json!({"model": model, "status": status.status}))
        }
        Commands::Rm { model } => {
            let deleted = ollama(&config)?.delete_model(&model).await?;
            print_json(&json!({"model": model, "deleted": deleted}))
        }
    }
}

/// Initialize tracing on stderr so stdout stays machine-readable.
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init();
}

fn open_store(path: &Path) -> Result<Store> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(Store::open(path)?)
}

fn orchestrator(config: &Config) -> Result<Orchestrator> {
    let store = open_store(&config.database_path)?;
    info!(path = %config.database_path.display(), "usage store opened");
    Ok(Orchestrator::from_settings(&config.settings, Arc::new(store)))
}

fn ollama(config: &Config) -> Result<OllamaProvider> {
    match config.settings.providers.ollama.as_ref().filter(|s| s.enabled) {
        Some(settings) => Ok(OllamaProvider::new(settings)?),
        None => Err(Error::OllamaDisabled),
    }
}

async fn stream_to_stdout(
    hub: &Orchestrator,
    provider: &str,
    request: &GenerationRequest,
) -> Result<()> {
    let mut stream = hub.generate_stream(provider, request)?;
    let mut stdout = std::io::stdout();
    while let Some(fragment) = stream.next().await {
        let fragment = fragment.map_err(|e| runtime::Error::Generation {
            provider: provider.to_string(),
            message: e.to_string(),
        })?;
        stdout.write_all(fragment.as_bytes())?;
        stdout.flush()?;
    }
    writeln!(stdout)?;
    Ok(())
}

fn read_messages(path: &Path) -> Result<Vec<Message>> {
    let raw = std::fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(|e| Error::Messages {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// `provider/model` into `(model, provider)`. The model part may itself
/// contain slashes.
fn parse_target(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('/') {
        Some((provider, model)) if !provider.is_empty() && !model.is_empty() => {
            Ok((model.to_string(), provider.to_string()))
        }
        _ => Err(format!("expected provider/model, got {raw:?}")),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

use anyhow::{Context, Result};
use clap::Parser;
use datachat::currency::fetch_currency;
use datachat::db::{init_pool, PgExecutor};
use datachat::session::{Role, SessionStore};
use datachat::telemetry::init_tracing;
use datachat::{Assistant, AssistantConfig, ColumnCatalog, LlmClient, Reply, ViewDefinition};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "datachat")]
#[command(about = "Ask questions about the clinic database in plain language")]
struct Args {
    /// PostgreSQL connection string (or set DATABASE_URL)
    #[arg(long)]
    database_url: Option<String>,

    /// LLM API key (or set LLM_API_KEY / GROQ_API_KEY)
    #[arg(long)]
    api_key: Option<String>,

    /// Chat model name (or set LLM_MODEL)
    #[arg(long)]
    model: Option<String>,

    /// OpenAI-compatible base URL (or set LLM_BASE_URL)
    #[arg(long)]
    base_url: Option<String>,

    /// Where CSV downloads are written
    #[arg(short, long, default_value = "downloads")]
    output_dir: PathBuf,
}

const HELP: &str = "Commands: /new, /switch <name>, /list, /help, /quit";

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = AssistantConfig::from_env()?;
    init_tracing(config.log_file.as_deref()).context("Failed to open the log file")?;

    if args.database_url.is_some() {
        config.database_url = args.database_url;
    }
    if args.api_key.is_some() {
        config.api_key = args.api_key;
    }
    if let Some(model) = args.model {
        config.llm_model = model;
    }
    if let Some(base_url) = args.base_url {
        config.llm_base_url = base_url;
    }

    let database_url = config
        .database_url
        .clone()
        .context("DATABASE_URL must be set (or pass --database-url)")?;
    let api_key = config
        .api_key
        .clone()
        .context("LLM_API_KEY must be set (or pass --api-key)")?;

    info!("🚀 datachat starting");
    let pool = init_pool(&database_url).await?;
    let executor = Arc::new(PgExecutor::new(pool));
    let currency = fetch_currency(executor.as_ref(), &config.currency_query, &config.default_currency).await;

    let catalog = match &config.column_catalog {
        Some(path) => ColumnCatalog::from_file(path)?,
        None => ColumnCatalog::builtin()?,
    };
    let llm = Arc::new(LlmClient::new(
        api_key,
        config.llm_base_url.clone(),
        config.llm_model.clone(),
        config.llm_temperature,
    ));
    info!("Using model {}", llm.model());

    let view = ViewDefinition::builtin(config.view_name.clone(), config.view_schema.clone());
    let assistant = Assistant::new(llm, executor.clone(), executor, catalog, view, &config, currency)?;

    let store = SessionStore::new(config.tokens_per_minute);
    let (_, handle) = store.create();
    let mut session = handle.lock().await;

    if let Some(greeting) = session.active().turns().first() {
        println!("{}", greeting.text());
    }
    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print_prompt(session.active().name());
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();

        match line.split_once(' ').map_or((line, ""), |(cmd, rest)| (cmd, rest.trim())) {
            ("/quit", _) | ("/exit", _) => break,
            ("/new", _) => {
                let name = session.new_conversation().to_string();
                println!("{} created and selected.", name);
            }
            ("/list", _) => {
                let active = session.active().name().to_string();
                for name in session.conversation_names() {
                    let marker = if name == active { "*" } else { " " };
                    println!("{} {}", marker, name);
                }
            }
            ("/switch", name) => {
                if session.switch_conversation(name) {
                    replay(session.active());
                } else {
                    println!("No conversation named '{}'.", name);
                }
            }
            ("/help", _) => println!("{}", HELP),
            _ if line.is_empty() => continue,
            _ => {
                let reply = assistant.handle_user_turn(&mut session, line).await;
                if let Err(e) = show_reply(&reply, &args.output_dir) {
                    error!("Failed to display the reply: {:#}", e);
                }
            }
        }
    }

    info!("👋 Bye");
    Ok(())
}

fn print_prompt(conversation: &str) {
    use std::io::Write;
    print!("[{}] > ", conversation);
    std::io::stdout().flush().ok();
}

fn replay(conversation: &datachat::Conversation) {
    for turn in conversation.turns() {
        let speaker = match turn.role() {
            Role::Human => "You",
            Role::Assistant => "Assistant",
        };
        println!("{}: {}", speaker, turn.text());
    }
}

fn show_reply(reply: &Reply, output_dir: &Path) -> Result<()> {
    if !reply.text.is_empty() {
        println!("\n{}\n", reply.text);
    }
    if let Some(table) = &reply.table {
        println!("{}", table);
    }
    if let Some(chart) = &reply.chart {
        println!("{}", serde_json::to_string_pretty(chart)?);
    }
    if let Some(download) = &reply.download {
        std::fs::create_dir_all(output_dir)?;
        let path = output_dir.join(&download.name);
        std::fs::write(&path, &download.bytes)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("Results saved to {}", path.display());
    }
    Ok(())
}

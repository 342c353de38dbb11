//! page-inbox - List pages and work a page's message inbox

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use libpagecast::logging::LoggingConfig;
use libpagecast::service::inbox::{counterpart_name, reply_recipient};
use libpagecast::{Config, PageService, PageSummary, PagecastError};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "page-inbox")]
#[command(version, about = "List pages and read or answer page conversations")]
#[command(long_about = r#"List pages and read or answer page conversations.

EXAMPLES:
    # Pages the configured tokens can reach
    page-inbox pages

    # Latest conversations of a page
    page-inbox conversations --page 1234567890

    # One thread with its last 50 messages
    page-inbox thread --page 1234567890 t_10223344

    # Reply; --to defaults to the other side of --thread
    page-inbox send --page 1234567890 --to 5551234 "Thanks, we are open until 6"
    page-inbox send --page 1234567890 --thread t_10223344 "On its way"

EXIT CODES:
    0 - Success
    1 - Platform, network or configuration error
    2 - No token for the page
    3 - Invalid input
    4 - Rate limited or duplicate message
"#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List reachable pages
    Pages,

    /// List recent conversations of a page
    Conversations {
        #[arg(short, long = "page", value_name = "PAGE_ID")]
        page: String,
    },

    /// Show one conversation
    Thread {
        #[arg(short, long = "page", value_name = "PAGE_ID")]
        page: String,

        /// Conversation id
        thread: String,
    },

    /// Send a text message from the page
    Send {
        #[arg(short, long = "page", value_name = "PAGE_ID")]
        page: String,

        /// Recipient id
        #[arg(long, value_name = "RECIPIENT_ID", required_unless_present = "thread")]
        to: Option<String>,

        /// Reply to the other participant of this conversation
        #[arg(long, value_name = "THREAD_ID", conflicts_with = "to")]
        thread: Option<String>,

        /// Message text
        text: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    LoggingConfig::from_env(cli.verbose).init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", describe(&e));
        std::process::exit(exit_code(&e));
    }
}

fn exit_code(error: &anyhow::Error) -> i32 {
    error
        .downcast_ref::<PagecastError>()
        .map(PagecastError::exit_code)
        .unwrap_or(1)
}

/// Operator-facing text for an error
fn describe(error: &anyhow::Error) -> String {
    match error.downcast_ref::<PagecastError>() {
        Some(PagecastError::Call(call)) => call.user_message(),
        _ => format!("{:#}", error),
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_pages(pages: &[PageSummary], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(&pages)?,
        OutputFormat::Text => {
            for page in pages {
                println!("{}\t{}", page.id, page.name);
            }
        }
    }
    Ok(())
}

/// One line per conversation: id, unread count, counterpart, last update
fn conversation_lines(page_id: &str, body: &serde_json::Value) -> Vec<String> {
    let conversations = body
        .get("data")
        .and_then(|d| d.as_array())
        .map(Vec::as_slice)
        .unwrap_or_default();
    conversations
        .iter()
        .map(|c| {
            let id = c.get("id").and_then(|v| v.as_str()).unwrap_or("-");
            let unread = c.get("unread_count").and_then(|v| v.as_u64()).unwrap_or(0);
            let who = counterpart_name(page_id, c).unwrap_or_else(|| "Unknown".to_string());
            let updated = c.get("updated_time").and_then(|v| v.as_str()).unwrap_or("");
            format!("{}\t{}\t{}\t{}", id, unread, who, updated)
        })
        .collect()
}

/// Messages oldest first, marking the page's own messages with `>`
fn thread_lines(page_id: &str, thread: &serde_json::Value) -> Vec<String> {
    let mut messages: Vec<&serde_json::Value> = thread
        .get("messages")
        .and_then(|m| m.get("data"))
        .and_then(|d| d.as_array())
        .map(|d| d.iter().collect())
        .unwrap_or_default();
    messages.reverse();

    messages
        .into_iter()
        .map(|m| {
            let from = m.get("from");
            let from_id = from.and_then(|f| f.get("id")).and_then(|v| v.as_str()).unwrap_or("");
            let from_name = from
                .and_then(|f| f.get("name"))
                .and_then(|v| v.as_str())
                .unwrap_or(if from_id.is_empty() { "Unknown" } else { from_id });
            let marker = if from_id == page_id { '>' } else { '<' };
            let text = m
                .get("message")
                .and_then(|v| v.as_str())
                .filter(|t| !t.is_empty())
                .unwrap_or("[attachment]");
            let time = m.get("created_time").and_then(|v| v.as_str()).unwrap_or("");
            format!("{} {} ({}): {}", marker, from_name, time, text)
        })
        .collect()
}

async fn run(cli: Cli) -> Result<()> {
    tracing::debug!("page-inbox started with args: {:?}", cli);
    let config = Config::load()?;
    let service = PageService::from_config(&config)?;

    let result = dispatch(&service, cli.command, cli.format).await;

    let remaining = service.executor().usage().remaining_cooldown();
    if !remaining.is_zero() {
        let rounded = Duration::from_secs(remaining.as_secs().max(1));
        eprintln!(
            "Platform cooldown active, next call allowed in {}",
            humantime::format_duration(rounded)
        );
    }
    result
}

async fn dispatch(service: &PageService, command: Commands, format: OutputFormat) -> Result<()> {
    match command {
        Commands::Pages => {
            let pages = service.list_pages().await?;
            print_pages(&pages, format)?;
        }
        Commands::Conversations { page } => {
            let body = service.list_conversations(&page).await?;
            match format {
                OutputFormat::Json => print_json(&body)?,
                OutputFormat::Text => {
                    for line in conversation_lines(&page, &body) {
                        println!("{}", line);
                    }
                }
            }
        }
        Commands::Thread { page, thread } => {
            let body = service.get_conversation(&page, &thread).await?;
            match format {
                OutputFormat::Json => print_json(&body)?,
                OutputFormat::Text => {
                    for line in thread_lines(&page, &body) {
                        println!("{}", line);
                    }
                }
            }
        }
        Commands::Send {
            page,
            to,
            thread,
            text,
        } => {
            let recipient = match (to, thread) {
                (Some(to), _) => to,
                (None, Some(thread)) => {
                    let body = service.get_conversation(&page, &thread).await?;
                    reply_recipient(&page, &body).ok_or_else(|| {
                        PagecastError::InvalidInput(format!(
                            "No one to reply to in conversation {}",
                            thread
                        ))
                    })?
                }
                (None, None) => {
                    return Err(PagecastError::InvalidInput("--to or --thread is required".to_string()).into())
                }
            };
            let body = service.send_message(&page, &recipient, &text).await?;
            match format {
                OutputFormat::Json => print_json(&body)?,
                OutputFormat::Text => {
                    let id = body
                        .get("message_id")
                        .and_then(|v| v.as_str())
                        .unwrap_or("-");
                    println!("{}:{}", recipient, id);
                }
            }
        }
    }
    Ok(())
}

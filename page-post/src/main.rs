//! page-post - Publish to managed pages through the call governor

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use libpagecast::logging::LoggingConfig;
use libpagecast::{Config, MediaPart, PageService, PagecastError, PublishOutcome, PublishRequest};
use std::io::{IsTerminal, Read};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "page-post")]
#[command(version, about = "Publish posts and media to managed pages")]
#[command(long_about = r#"Publish posts and media to managed pages.

Every call goes through the governor: calls are spaced per page and
globally, platform usage headers open a cooldown when quota runs low,
short throttles are retried once, and the same content is not sent to the
same page twice within the duplicate window.

EXAMPLES:
    # Text post to one page
    page-post --page 1234567890 "Opening at 9 today"

    # Same post to several pages, message from stdin
    echo "Sale starts now" | page-post -p 111 -p 222

    # Photo with caption
    page-post --page 111 --kind photo --media cat.jpg --caption "Meet Tom"

    # Machine-readable results
    page-post -p 111 -p 222 --format json "Hello" | jq '.[] | select(.success)'

EXIT CODES:
    0 - Published to every page
    1 - Platform, network or configuration error
    2 - No token for a page
    3 - Invalid input (empty message, missing media)
    4 - Rate limited or duplicate; try again later
"#)]
struct Cli {
    /// Message or caption (reads from stdin if not provided)
    content: Option<String>,

    /// Target page id (repeatable)
    #[arg(short, long = "page", value_name = "PAGE_ID", required = true)]
    pages: Vec<String>,

    /// What to publish
    #[arg(short, long, value_enum, default_value_t = Kind::Feed)]
    kind: Kind,

    /// Media file for photo, video and reel posts
    #[arg(short, long, value_name = "PATH")]
    media: Option<PathBuf>,

    /// Caption or description for media (defaults to CONTENT)
    #[arg(short, long)]
    caption: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Kind {
    Feed,
    Photo,
    Video,
    Reel,
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

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(exit_code(&e));
        }
    }
}

/// Exit code for an error that escaped `run`
fn exit_code(error: &anyhow::Error) -> i32 {
    error
        .downcast_ref::<PagecastError>()
        .map(PagecastError::exit_code)
        .unwrap_or(1)
}

fn read_content(arg: Option<String>) -> Result<String> {
    if let Some(content) = arg {
        return Ok(content);
    }
    let stdin = std::io::stdin();
    if stdin.is_terminal() {
        return Ok(String::new());
    }
    let mut buffer = String::new();
    stdin
        .lock()
        .read_to_string(&mut buffer)
        .context("Failed to read content from stdin")?;
    Ok(buffer)
}

fn build_request(cli: &Cli, content: String) -> Result<PublishRequest> {
    if cli.kind == Kind::Feed {
        if cli.media.is_some() {
            return Err(PagecastError::InvalidInput(
                "--media needs --kind photo, video or reel".to_string(),
            )
            .into());
        }
        return Ok(PublishRequest::Feed { message: content });
    }

    let path = cli.media.as_ref().ok_or_else(|| {
        PagecastError::InvalidInput(format!("--kind {:?} requires --media", cli.kind).to_lowercase())
    })?;
    let media = MediaPart::from_path(path)?;
    let text = cli.caption.clone().unwrap_or(content).trim().to_string();

    Ok(match cli.kind {
        Kind::Photo => PublishRequest::Photo {
            media,
            caption: text,
        },
        Kind::Video => PublishRequest::Video {
            media,
            description: text,
        },
        Kind::Reel | Kind::Feed => PublishRequest::Reel {
            media,
            description: text,
        },
    })
}

fn print_outcomes(outcomes: &[PublishOutcome], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(outcomes)?);
        }
        OutputFormat::Text => {
            for outcome in outcomes {
                if outcome.success {
                    let mut line = format!(
                        "{}:{}",
                        outcome.page_id,
                        outcome.post_id.as_deref().unwrap_or("-")
                    );
                    if let Some(url) = &outcome.permalink_url {
                        line.push(' ');
                        line.push_str(url);
                    }
                    println!("{}", line);
                } else {
                    eprintln!(
                        "Error: {}: {}",
                        outcome.page_id,
                        outcome.error.as_deref().unwrap_or("unknown error")
                    );
                }
            }
        }
    }
    Ok(())
}

/// Seconds-rounded cooldown for display
fn cooldown_hint(remaining: Duration) -> Option<String> {
    if remaining.is_zero() {
        return None;
    }
    let rounded = Duration::from_secs(remaining.as_secs().max(1));
    Some(humantime::format_duration(rounded).to_string())
}

async fn run(cli: Cli) -> Result<i32> {
    tracing::debug!("page-post started with args: {:?}", cli);
    let content = read_content(cli.content.clone())?;
    let request = build_request(&cli, content)?;

    let config = Config::load()?;
    let service = PageService::from_config(&config)?;

    let outcomes = service.publish_many(&cli.pages, &request).await;
    print_outcomes(&outcomes, cli.format)?;

    if let Some(hint) = cooldown_hint(service.executor().usage().remaining_cooldown()) {
        eprintln!("Platform cooldown active, next call allowed in {}", hint);
    }

    Ok(outcomes
        .iter()
        .map(|o| o.exit_code)
        .find(|code| *code != 0)
        .unwrap_or(0))
}

mod app;
mod console;
mod logging;
mod output;
mod prompt_writer;

use std::path::PathBuf;

use clap::Parser;
use miette::Result;
use owo_colors::OwoColorize;
use rtar_core::config::{self, RtarConfig};
use rtar_core::parse_media_id;
use tracing::info;

use crate::app::App;

#[derive(Parser)]
#[command(name = "rtar")]
#[command(about = "Live comment stream auto-reply bot")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Media id or share URL of the stream to join (overrides config)
    #[arg(long, short = 'm')]
    media: Option<String>,

    /// Enable debug logging and the debug log file
    #[arg(long)]
    debug: bool,

    /// Directory for the debug log file
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

async fn load_config(cli: &Cli) -> Result<RtarConfig> {
    let mut config = match &cli.config {
        Some(path) => config::load_config(path).await?,
        None => config::load_config_from_standard_locations().await?,
    };

    if let Some(media) = &cli.media {
        config.stream.media_id = parse_media_id(media)
            .ok_or_else(|| miette::miette!("Could not find a media id in {:?}", media))?;
    }

    if let Ok(key) = std::env::var("RTAR_API_KEY") {
        if !key.is_empty() {
            config.model.api_key = key;
        }
    }

    config.debug |= cli.debug;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists
    let _ = dotenvy::dotenv();
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .rgb_colors(miette::RgbColors::Preferred)
                .with_cause_chain()
                .color(true)
                .context_lines(5)
                .tab_width(2)
                .break_words(true)
                .build(),
        )
    }))?;
    miette::set_panic_hook();
    let cli = Cli::parse();

    let terminal = prompt_writer::PromptWriter::new();
    let config = load_config(&cli).await?;

    let log_dir = cli.log_dir.clone().unwrap_or_else(logging::default_log_dir);
    let logging = logging::init(config.debug, terminal, &log_dir)?;
    if let Some(pattern) = logging.log_files() {
        info!("Debug logs: {}", pattern.display());
    }

    config.validate()?;

    println!("{}", "RTAR live comment bot".bright_green().bold());
    println!("Bot: {}", config.bot.nickname.bright_cyan());
    println!("Media: {}", config.stream.media_id.to_string().bright_yellow());
    println!("Model: {}", config.model.model.bright_yellow());

    let app = App::build(config, cli.config.clone(), logging).await?;
    app.start().await;
    console::run(&app).await
}

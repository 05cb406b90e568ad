use anyhow::Result;
use dotenvy::dotenv;

use ytstream::cli::{Cli, Commands};
use ytstream::core::config::{self, Settings};
use ytstream::core::validation::validate_locator;
use ytstream::core::{init_logger, log_extractor_configuration, metrics, web_server};
use ytstream::download::extractor::YtDlp;
use ytstream::download::metadata;

/// Main entry point
///
/// Parses CLI arguments and dispatches to the selected subcommand.
///
/// # Errors
/// Returns an error if initialization fails (logging, binding the listener)
/// or a one-shot command fails.
#[tokio::main]
async fn main() -> Result<()> {
    // Must run before any config static is first read
    let _ = dotenv();

    let cli = Cli::parse_args();

    // Log panics from request tasks instead of losing them on stderr
    std::panic::set_hook(Box::new(|panic_info| {
        log::error!("Panic caught: {:?}", panic_info);
        if let Some(location) = panic_info.location() {
            log::error!("Panic at {}:{}:{}", location.file(), location.line(), location.column());
        }
        if let Some(msg) = panic_info.payload().downcast_ref::<&str>() {
            log::error!("Panic message: {}", msg);
        }
    }));

    init_logger(&config::LOG_FILE_PATH, &config::LOG_LEVEL)?;

    let mut settings = Settings::from_env();

    match cli.command {
        Some(Commands::Serve { host, port, ytdl_bin }) => {
            if let Some(host) = host {
                settings.host = host;
            }
            if let Some(port) = port {
                settings.port = port;
            }
            if let Some(bin) = ytdl_bin {
                settings.ytdl_bin = bin;
            }
            run_server(settings).await
        }
        Some(Commands::Info { url, json }) => run_cli_info(&settings, &url, json).await,
        Some(Commands::Check) => run_check(&settings).await,
        None => {
            log::info!("No command specified, starting the API server");
            run_server(settings).await
        }
    }
}

async fn run_server(settings: Settings) -> Result<()> {
    log::info!("ytstream v{} starting", env!("CARGO_PKG_VERSION"));
    metrics::init_metrics();
    log_extractor_configuration(&settings).await;
    web_server::run_server(settings).await?;
    log::info!("Server stopped");
    Ok(())
}

/// Run the info command
async fn run_cli_info(settings: &Settings, url: &str, json: bool) -> Result<()> {
    let locator = validate_locator(url)?;
    let extractor = YtDlp::from_settings(settings);
    let meta = metadata::fetch_metadata(&extractor, &locator)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to get info: {}", e))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&meta)?);
    } else {
        let formats: Vec<String> = meta.variants.iter().map(|v| v.label()).collect();
        println!("Title:    {}", meta.title);
        println!("Channel:  {}", meta.uploader);
        println!("Duration: {}", meta.duration);
        println!("Views:    {}", meta.view_count);
        println!("Formats:  {}", formats.join(", "));
        if !meta.thumbnail.is_empty() {
            println!("Thumb:    {}", meta.thumbnail);
        }
    }
    Ok(())
}

/// Run the check command
async fn run_check(settings: &Settings) -> Result<()> {
    match ytstream::core::logging::ytdlp_version(settings).await {
        Ok(version) => {
            println!("{} {}", settings.ytdl_bin, version);
            Ok(())
        }
        Err(e) => Err(anyhow::anyhow!("{} is not usable: {}", settings.ytdl_bin, e)),
    }
}

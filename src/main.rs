use anyhow::{anyhow, Result};
use clap::{Arg, ArgAction, Command};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, reload, EnvFilter, Registry};

use clip_uploader::{
    ClipApiClient, Config, LifecycleController, Phase, ResultLinkNavigator, UploadRequest,
};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("Clip Uploader")
        .version(env!("CARGO_PKG_VERSION"))
        .author("TigreRoll")
        .about("Upload a clip and follow it until the server has encoded it")
        .arg(
            Arg::new("file")
                .short('f')
                .long("file")
                .value_name("FILE")
                .help("Video file to upload")
                .required(true),
        )
        .arg(
            Arg::new("title")
                .short('t')
                .long("title")
                .value_name("TITLE")
                .help("Clip title (derived from the file name when omitted)"),
        )
        .arg(
            Arg::new("description")
                .short('d')
                .long("description")
                .value_name("TEXT")
                .help("Clip description")
                .default_value(""),
        )
        .arg(
            Arg::new("unlisted")
                .long("unlisted")
                .help("Hide the clip from public listings")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("server")
                .short('s')
                .long("server")
                .value_name("URL")
                .help("Clip server base URL (overrides configuration)"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    // Logging starts before config loading so its warnings are visible.
    let verbose = matches.get_flag("verbose");
    let log_level = init_logging(verbose);

    let mut config = match matches.get_one::<String>("config") {
        Some(path) => Config::from_file(Path::new(path))?,
        None => Config::load().unwrap_or_else(|e| {
            warn!("Failed to load config, using defaults: {}", e);
            Config::default()
        }),
    };

    if let Some(server) = matches.get_one::<String>("server") {
        config.server.server_url = server.clone();
    }

    if let Err(e) = log_level.reload(log_filter(verbose, &config.output.log_level)) {
        warn!("Cannot apply log level {}: {}", config.output.log_level, e);
    }
    config.validate()?;

    let file = matches
        .get_one::<String>("file")
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("--file is required"))?;
    if !file.is_file() {
        error!("Video file does not exist: {}", file.display());
        return Err(anyhow!("Video file not found"));
    }

    let request = UploadRequest::from_file(&file, matches.get_one::<String>("title").cloned())
        .await?
        .with_description(
            matches
                .get_one::<String>("description")
                .cloned()
                .unwrap_or_default(),
        )
        .with_unlisted(matches.get_flag("unlisted"));

    info!("🎬 Clip Uploader starting...");
    info!("📁 File: {}", file.display());
    info!("🏷️  Title: {}", request.title());
    info!("🌐 Server: {}", config.server.server_url);

    let client = Arc::new(ClipApiClient::new(&config)?);
    let navigator = Arc::new(ResultLinkNavigator::new(config.server.clone()));
    let mut controller = LifecycleController::with_client(client, &config, navigator.clone());

    let mut updates = controller.subscribe();
    let reporter = tokio::spawn(async move {
        let mut last: Option<(Phase, u8)> = None;
        while updates.changed().await.is_ok() {
            let status = updates.borrow_and_update().clone();
            let key = (status.phase, status.percent());
            if last != Some(key) {
                info!("{} {}%", status.phase.status_message(), status.percent());
                last = Some(key);
            }
        }
    });

    let start_time = std::time::Instant::now();
    controller.start(request)?;

    let outcome = tokio::select! {
        phase = controller.run_until_terminal() => Some(phase),
        _ = tokio::signal::ctrl_c() => None,
    };

    let final_status = controller.shutdown();
    let _ = reporter.await;

    match outcome {
        Some(Phase::Completed) => {
            info!("🎉 Done in {:.1}s", start_time.elapsed().as_secs_f64());
            if let Some(url) = navigator.last_result() {
                println!("{url}");
            }
            Ok(())
        }
        Some(phase) => {
            error!("{}", phase.status_message());
            Err(anyhow!("{}", phase.status_message()))
        }
        None => {
            warn!("Interrupted while {}", final_status.phase.status_message());
            Err(anyhow!("Interrupted"))
        }
    }
}

/// Install the subscriber with the default level; the handle swaps in the configured one
fn init_logging(verbose: bool) -> reload::Handle<EnvFilter, Registry> {
    let (filter, handle) = reload::Layer::new(log_filter(verbose, "info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
    handle
}

fn log_filter(verbose: bool, log_level: &str) -> EnvFilter {
    if verbose {
        EnvFilter::new("clip_uploader=debug,warn")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("clip_uploader={},warn", log_level)))
    }
}

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

use verifydesk_uploads::config::{
    clear_config, get_config_file_path, load_config, save_config, UploaderConfig,
};
use verifydesk_uploads::error::UploadError;
use verifydesk_uploads::logging::{self, log_info};
use verifydesk_uploads::network::PollingNetworkObserver;
use verifydesk_uploads::uploads::{
    FinalizedMedia, MediaMetadata, MediaType, SourceFile, Submitter, UploadManager, UploadState,
    MAX_TITLE_CHARS,
};

const USAGE: &str = "Usage: verifydesk-upload TYPE_KEY=PATH [TYPE_KEY=PATH ...]
       verifydesk-upload --log [N]
       verifydesk-upload --init-config | --reset-config

Uploads each file as the given document type and prints the finalized
list as JSON once every required document is covered.
With --log, prints the newest N (default 20) upload-queue log entries.
--init-config writes a default config file if none exists; --reset-config
overwrites it with defaults.
Configuration is read from ~/.verifydesk/config.json.";

const DEFAULT_LOG_LINES: usize = 20;

/// Prints the finalized list to stdout
struct JsonSubmitter;

#[async_trait]
impl Submitter for JsonSubmitter {
    async fn submit(&self, media: Vec<FinalizedMedia>) -> Result<(), UploadError> {
        println!("{}", serde_json::to_string_pretty(&media)?);
        Ok(())
    }
}

fn parse_pairs(args: &[String], media_types: &[MediaType]) -> anyhow::Result<Vec<(MediaType, PathBuf)>> {
    args.iter()
        .map(|arg| {
            let (key, path) = arg
                .split_once('=')
                .ok_or_else(|| anyhow!("Expected TYPE_KEY=PATH, got '{}'", arg))?;
            let media_type = media_types
                .iter()
                .find(|t| t.key == key)
                .cloned()
                .ok_or_else(|| {
                    let known: Vec<&str> = media_types.iter().map(|t| t.key.as_str()).collect();
                    anyhow!("Unknown document type '{}' (known: {})", key, known.join(", "))
                })?;
            Ok((media_type, PathBuf::from(path)))
        })
        .collect()
}

fn print_recent_log(count: Option<&str>) -> anyhow::Result<()> {
    let count = match count {
        Some(raw) => raw
            .parse::<usize>()
            .with_context(|| format!("Expected a line count, got '{}'", raw))?,
        None => DEFAULT_LOG_LINES,
    };
    let entries = logging::read_component_logs("upload-queue", Some(count))
        .map_err(|e| anyhow!("Failed to read the upload log: {}", e))?;
    for entry in entries.iter().rev() {
        println!("{} {:?} {}", entry.timestamp, entry.level, entry.message);
    }
    Ok(())
}

fn init_config(reset: bool) -> anyhow::Result<()> {
    let path = get_config_file_path().map_err(|e| anyhow!("{}", e))?;
    if reset {
        clear_config().map_err(|e| anyhow!("Failed to reset config: {}", e))?;
    } else if path.exists() {
        eprintln!("Config already exists at {}", path.display());
        return Ok(());
    } else {
        save_config(&UploaderConfig::default())
            .map_err(|e| anyhow!("Failed to write config: {}", e))?;
    }
    eprintln!("Wrote default config to {}", path.display());
    Ok(())
}

/// "{type} ({file})", clipped to the longest title metadata accepts
fn title_for(media_type: &MediaType, file_name: &str) -> String {
    let full = format!("{} ({})", media_type.title, file_name);
    if full.chars().count() <= MAX_TITLE_CHARS {
        return full;
    }
    let clipped: String = full.chars().take(MAX_TITLE_CHARS - 1).collect();
    format!("{}…", clipped.trim_end())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = logging::init_logging() {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() || args.iter().any(|a| a == "-h" || a == "--help") {
        println!("{}", USAGE);
        return Ok(());
    }
    match args[0].as_str() {
        "--log" => return print_recent_log(args.get(1).map(String::as_str)),
        "--init-config" => return init_config(false),
        "--reset-config" => return init_config(true),
        _ => {}
    }

    let config = load_config().map_err(|e| anyhow!("Failed to load config: {}", e))?;
    let pairs = parse_pairs(&args, &config.media_types)?;
    if pairs.len() > config.max_files {
        bail!("At most {} files can be uploaded at once", config.max_files);
    }

    let manager = UploadManager::from_config(&config)?.build()?;

    // held until the end of the run; dropping it stops the reachability checks
    let _observer = match config.server_url.as_deref() {
        Some(server_url) => {
            let observer = PollingNetworkObserver::spawn(
                server_url,
                Duration::from_secs(config.health_check_interval_secs.max(1)),
                manager.shutdown_coordinator().clone(),
            );
            manager.watch_network(&observer)?;
            Some(observer)
        }
        None => None,
    };

    for (media_type, path) in &pairs {
        let file = SourceFile::from_path(path).await?;
        let file_name = file.name.clone();

        let report = manager.add_files(vec![file])?;
        if let Some(message) = report.validation_message() {
            eprintln!("{}", message);
            continue;
        }
        for id in &report.admitted {
            let metadata = MediaMetadata {
                media_type: Some(media_type.clone()),
                title: title_for(media_type, &file_name),
                ..MediaMetadata::default()
            };
            // the upload keeps running; the gate reports the missing metadata
            if let Err(e) = manager.update_metadata(id, metadata) {
                eprintln!("{}: {}", file_name, e);
            }
        }
    }

    manager.wait_until_settled().await;

    for item in manager.items() {
        match item.status {
            UploadState::Done => eprintln!("✅ {} -> {}", item.filename, item.uploaded_url.unwrap_or_default()),
            UploadState::Error => eprintln!("❌ {}: {}", item.filename, item.error.unwrap_or_default()),
            other => eprintln!("{}: {}", item.filename, other),
        }
    }

    let finalized = manager
        .submit(&JsonSubmitter)
        .await
        .context("Upload not submitted")?;
    log_info("cli", &format!("Submitted {} document(s)", finalized.len())).unwrap_or_default();

    Ok(())
}

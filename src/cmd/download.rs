use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::debug;

use thuis::batch::{BatchEvent, BatchResult, Orchestrator, RunOptions};
use thuis::browser::{Browser, ChromeBrowser, ChromeOptions};
use thuis::config::Settings;
use thuis::credentials;
use thuis::http_client::ApiClient;
use thuis::stream::backends::FfmpegBackend;
use thuis::stream::DownloadExecutor;
use thuis::taxonomy::{self, UrlKind};

pub struct DownloadArgs {
    pub options: RunOptions,
    pub username: Option<String>,
    pub password: Option<String>,
    pub show_browser: bool,
}

/// Download one episode or a whole season. `Ok(false)` means no episode
/// was downloaded, including when nothing needed downloading.
pub async fn cmd_download(url: &str, args: DownloadArgs, mut settings: Settings) -> Result<bool> {
    if args.show_browser {
        settings.browser.headless = false;
    }

    let executor = FfmpegBackend::from_settings(&settings.download);
    if !executor.check_available().await {
        bail!("ffmpeg not found. Install it or point [download].ffmpeg at the binary");
    }

    let credentials = credentials::resolve(args.username, args.password, &settings.credentials_path())
        .context("Failed to read credentials")?;
    if credentials.is_none() {
        debug!("no credentials configured, relying on the stored session");
    }

    let label = match taxonomy::classify(url) {
        UrlKind::Season => "Season",
        UrlKind::Trailer => "Trailer",
        UrlKind::Single => "Episode",
    };
    eprintln!("🎬 {label}: {url}");

    let fetcher = Arc::new(ApiClient::from_settings(&settings).context("Failed to build HTTP client")?);
    let browser = ChromeBrowser::launch(ChromeOptions::from_settings(&settings))
        .await
        .context("Failed to launch the browser")?;

    let orchestrator =
        Orchestrator::new(settings, fetcher, Arc::new(executor)).with_events(Arc::new(print_event));
    let outcome = orchestrator
        .run(&browser, url, credentials.as_ref(), &args.options)
        .await;

    if let Err(e) = browser.close().await {
        debug!("browser close failed: {e}");
    }

    let result = outcome?;
    print_summary(&result);
    Ok(result.is_success())
}

fn print_event(event: &BatchEvent) {
    match event {
        BatchEvent::Authenticated => eprintln!("🔐 Session ready"),
        BatchEvent::Discovered { found } => eprintln!("📋 Found {found} episodes"),
        BatchEvent::Planned { total: 0, skipped } => {
            eprintln!("📭 Nothing to download ({skipped} skipped)");
        }
        BatchEvent::Planned { total, skipped } => {
            eprintln!("📥 {total} to download, {skipped} skipped");
        }
        BatchEvent::Started {
            index,
            total,
            file_name,
        } => eprintln!("\n▶️  [{index}/{total}] {file_name}"),
        BatchEvent::Resolved { title, kind } => eprintln!("   🎞️  {title} ({kind})"),
        BatchEvent::Progress { progress, .. } => {
            let speed = progress
                .speed
                .map_or_else(String::new, |s| format!(" at {s:.1}x"));
            eprint!(
                "\r   ⏱️  {} of media{speed}   ",
                format_duration(progress.media_seconds)
            );
        }
        BatchEvent::Succeeded {
            file_name,
            bytes,
            elapsed,
        } => {
            eprintln!(
                "\n   ✅ Saved {file_name} ({} in {})",
                format_size(*bytes),
                format_duration(elapsed.as_secs_f64())
            );
        }
        BatchEvent::Failed { file_name, reason } => {
            eprintln!("\n   ❌ {file_name}: {reason}");
        }
        BatchEvent::Pausing { delay } => {
            eprintln!("   ⏳ Waiting {:.1}s", delay.as_secs_f64());
        }
    }
}

fn print_summary(result: &BatchResult) {
    println!(
        "\n📊 {} downloaded, {} failed, {} planned",
        result.succeeded, result.failed, result.planned
    );
    for (file_name, reason) in &result.failures {
        println!("   ❌ {file_name}: {reason}");
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn format_duration(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

#[allow(clippy::cast_precision_loss)]
fn format_size(bytes: u64) -> String {
    const MB: f64 = 1024.0 * 1024.0;
    let mb = bytes as f64 / MB;
    if mb >= 1024.0 {
        format!("{:.2} GB", mb / 1024.0)
    } else {
        format!("{mb:.1} MB")
    }
}

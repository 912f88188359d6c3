use std::{
    path::PathBuf,
    sync::{atomic::AtomicBool, Arc},
    time::Duration,
};

use anyhow::Context;
use clap::Parser;
use harvester::{
    browser_controller::BrowserController,
    config::{UserConfig, DEFAULT_CONFIG_FILE},
    downloader::{YtDlp, DEFAULT_DOWNLOADER},
    fetcher::ReqwestFetcher,
    runner::{Runner, RunnerOptions},
    utils::site_host,
};
use log::{debug, info};
use signal_hook::consts::{SIGINT, SIGTERM};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Infinite-scroll photo and video harvester", long_about = None)]
struct Args {
    /// The URL of the listing page to scrape
    url: String,
    /// Run with a visible browser and keep it open for a while after the run
    #[arg(short = 'd', long)]
    debug_headless: bool,
    /// Number of links acquired at once, each in its own tab
    #[arg(short = 'w', long, default_value_t = 1)]
    workers: usize,
    /// Root directory for downloads and links.txt (defaults to the current directory)
    #[arg(short = 'o', long)]
    output_dir: Option<PathBuf>,
    /// Environment file holding USER_CONFIG
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// Milliseconds to wait after each scroll for new content
    #[arg(long, default_value_t = 2000)]
    scroll_settle_ms: u64,
    /// Upper bound on scroll cycles for pages that never stop growing
    #[arg(long, default_value_t = 200)]
    max_scroll_cycles: u32,
    /// Seconds to wait for a video's stream manifest after playback is triggered
    #[arg(long, default_value_t = 30)]
    manifest_timeout: u64,
    /// Stream downloader executable
    #[arg(long, default_value = DEFAULT_DOWNLOADER)]
    downloader: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = Args::parse();
    debug!("Starting harvester with {:#?}", args.clone());

    let host = site_host(&args.url)?;
    let config = UserConfig::load(&args.config, &host)?;

    let mut builder = RunnerOptions::default_builder();
    builder
        .workers(args.workers)
        .scroll_settle(Duration::from_millis(args.scroll_settle_ms))
        .max_scroll_cycles(args.max_scroll_cycles)
        .manifest_timeout(Duration::from_secs(args.manifest_timeout));
    if let Some(dir) = args.output_dir {
        builder.output_dir(dir);
    }
    let options = builder.build()?;

    let browser = Arc::new(
        BrowserController::new(&config, !args.debug_headless).context("could not start browser")?,
    );
    let fetcher = Arc::new(ReqwestFetcher::new(&config.user_agent)?);
    let downloader = Arc::new(YtDlp::new(args.downloader));

    let should_terminate = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGTERM, Arc::clone(&should_terminate))?;
    signal_hook::flag::register(SIGINT, Arc::clone(&should_terminate))?;

    let runner = Runner::new(options, browser.clone(), fetcher, downloader)
        .with_termination_flag(should_terminate);
    let summary = runner
        .run(&args.url)
        .await
        .context(format!("harvest of {} failed", args.url))?;

    println!(
        "{} links processed: {} photos written, {} videos downloaded, {} failures",
        summary.processed,
        summary.photos_written,
        summary.videos_downloaded,
        summary.failures.len()
    );

    if args.debug_headless {
        info!("debug mode active, keeping browser open...");
        tokio::time::sleep(Duration::from_secs(10)).await;
    }

    Ok(())
}

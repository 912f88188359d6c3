use std::{
    collections::HashSet,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Context;
use futures::StreamExt;
use tokio::sync::{mpsc, Mutex};

use crate::{
    classifier::LinkClassifier,
    crawler::{PaginationCrawler, DEFAULT_MAX_CYCLES, DEFAULT_SETTLE},
    downloader::StreamDownloader,
    fetcher::HttpFetch,
    page::{PageDriver, PageSource, WaitPolicy},
    photo::{PhotoAcquirer, DEFAULT_STORAGE_MARKER},
    types::{AcquisitionResult, DiscoveredLink, LinkKind, LinkOutcome, RunSummary},
    utils::{write_links, PathLocks, DEFAULT_LINKS_FILE},
    video::{
        VideoAcquirer, DEFAULT_MANIFEST_MARKER, DEFAULT_MANIFEST_TIMEOUT,
        DEFAULT_NETWORK_IDLE_TIMEOUT,
    },
};

#[derive(Builder, Debug, Clone)]
#[builder(setter(into))]
pub struct RunnerOptions {
    // root of the <owner>/<photos|videos> tree and of the link dump
    #[builder(default = "self.default_output_dir()")]
    output_dir: PathBuf,
    // links acquired at once, each with its own page
    #[builder(default = "1")]
    workers: usize,
    // wait after each scroll for lazy content to render
    #[builder(default = "DEFAULT_SETTLE")]
    scroll_settle: Duration,
    #[builder(default = "DEFAULT_MAX_CYCLES")]
    max_scroll_cycles: u32,
    #[builder(default = "DEFAULT_MANIFEST_TIMEOUT")]
    manifest_timeout: Duration,
    #[builder(default = "DEFAULT_NETWORK_IDLE_TIMEOUT")]
    network_idle_timeout: Duration,
    #[builder(default = "DEFAULT_STORAGE_MARKER.into()")]
    storage_marker: String,
    #[builder(default = "DEFAULT_MANIFEST_MARKER.into()")]
    manifest_marker: String,
    #[builder(default = "DEFAULT_LINKS_FILE.into()")]
    links_file: String,
}

impl RunnerOptions {
    pub fn default_builder() -> RunnerOptionsBuilder {
        RunnerOptionsBuilder::default()
    }

    pub fn output_dir(&self) -> &PathBuf {
        &self.output_dir
    }

    pub fn links_path(&self) -> PathBuf {
        self.output_dir.join(&self.links_file)
    }
}

impl RunnerOptionsBuilder {
    fn default_output_dir(&self) -> PathBuf {
        std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
    }
}

/// Crawls one listing and acquires every photo and video link found on it.
pub struct Runner {
    pages: Arc<dyn PageSource>,
    crawler: PaginationCrawler,
    photos: PhotoAcquirer,
    videos: VideoAcquirer,
    options: RunnerOptions,
    should_terminate: Arc<AtomicBool>,
}

impl Runner {
    pub fn new(
        options: RunnerOptions,
        pages: Arc<dyn PageSource>,
        fetcher: Arc<dyn HttpFetch>,
        downloader: Arc<dyn StreamDownloader>,
    ) -> Self {
        let locks = Arc::new(PathLocks::new());
        Runner {
            pages,
            crawler: PaginationCrawler::new(options.scroll_settle, options.max_scroll_cycles),
            photos: PhotoAcquirer::new(fetcher, locks.clone(), &options.storage_marker),
            videos: VideoAcquirer::new(
                downloader,
                locks,
                &options.manifest_marker,
                options.manifest_timeout,
                options.network_idle_timeout,
            ),
            options,
            should_terminate: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Once the flag is raised no further links are dispatched.
    pub fn with_termination_flag(mut self, should_terminate: Arc<AtomicBool>) -> Self {
        self.should_terminate = should_terminate;
        self
    }

    pub async fn run(&self, entry_url: &str) -> anyhow::Result<RunSummary> {
        let classifier = LinkClassifier::for_entry_url(entry_url)?;
        let workers = self.options.workers.max(1);

        let page = self.pages.new_page().await?;
        info!("navigating to: {}", entry_url);
        page.navigate(entry_url, WaitPolicy::DomContentLoaded)
            .await
            .context(format!("could not open {}", entry_url))?;

        let crawl = self
            .crawler
            .crawl(page.as_ref())
            .await
            .context(format!("crawl of {} failed", entry_url))?;
        let links = classifier.classify_all(&crawl.links);
        info!(
            "{} of {} harvested links are media links ({} scroll cycles)",
            links.len(),
            crawl.links.len(),
            crawl.cycles
        );

        let queue = unique_links(&links);
        if queue.len() < links.len() {
            debug!("{} repeated links will be acquired once", links.len() - queue.len());
        }

        let mut pool = vec![page];
        for _ in 1..workers.min(queue.len()) {
            pool.push(self.pages.new_page().await?);
        }

        let queued = queue.len();
        let outcomes = self.process(queue, pool, workers).await;

        let links_path = self.options.links_path();
        write_links(&links_path, &links).await?;
        debug!("wrote {} links to {:?}", links.len(), links_path);

        let summary = RunSummary::from_outcomes(links, queued, &outcomes);
        for (url, cause) in summary.failures.iter() {
            warn!("failed {}: {}", url, cause);
        }
        info!(
            "processed {} links: {} photos written, {} videos downloaded, {} failed",
            summary.processed,
            summary.photos_written,
            summary.videos_downloaded,
            summary.failures.len()
        );
        if summary.pending > 0 {
            warn!("{} links left unprocessed after termination", summary.pending);
        }
        Ok(summary)
    }

    async fn process(
        &self,
        links: Vec<DiscoveredLink>,
        pool: Vec<Arc<dyn PageDriver>>,
        workers: usize,
    ) -> Vec<LinkOutcome> {
        // never zero, never more than the queue itself
        let capacity = workers.saturating_mul(2).min(links.len()).max(1);
        let (link_tx, link_rx) = mpsc::channel::<(usize, DiscoveredLink)>(capacity);
        let should_terminate = self.should_terminate.clone();

        tokio::spawn(async move {
            for item in links.into_iter().enumerate() {
                if should_terminate.load(Ordering::Relaxed) {
                    warn!("termination requested, no further links dispatched");
                    return;
                }
                if let Err(e) = link_tx.send(item).await {
                    error!("could not send link to the workers {}", e);
                    return;
                }
            }
        });

        let pool = Mutex::new(pool);
        let outcomes = Mutex::new(Vec::new());

        tokio_stream::wrappers::ReceiverStream::new(link_rx)
            .for_each_concurrent(workers, |(index, link)| {
                let pool = &pool;
                let outcomes = &outcomes;
                async move {
                    let page = pool.lock().await.pop();
                    let page = match page {
                        Some(p) => Ok(p),
                        None => self.pages.new_page().await,
                    };

                    let result = match page {
                        Ok(page) => {
                            let res = self.acquire(page.as_ref(), &link).await;
                            pool.lock().await.push(page);
                            res
                        }
                        Err(e) => Err(e),
                    };

                    let result = result.map_err(|e| {
                        error!("error acquiring {}: {:#}", link.url, e);
                        format!("{:#}", e)
                    });
                    outcomes.lock().await.push((index, LinkOutcome { link, result }));
                }
            })
            .await;

        let mut outcomes = outcomes.into_inner();
        outcomes.sort_by_key(|(index, _)| *index);
        outcomes.into_iter().map(|(_, o)| o).collect()
    }

    async fn acquire(
        &self,
        page: &dyn PageDriver,
        link: &DiscoveredLink,
    ) -> anyhow::Result<AcquisitionResult> {
        debug!("acquiring {} link {}", link.kind, link.url);
        let root = &self.options.output_dir;
        match link.kind {
            LinkKind::Photo => Ok(AcquisitionResult::Photos(
                self.photos.acquire(page, link, root).await?,
            )),
            LinkKind::Video => Ok(AcquisitionResult::Video(
                self.videos.acquire(page, link, root).await?,
            )),
        }
    }
}

// first occurrence of each url, in harvest order
fn unique_links(links: &[DiscoveredLink]) -> Vec<DiscoveredLink> {
    let mut seen = HashSet::new();
    links
        .iter()
        .filter(|l| seen.insert(l.url.as_str()))
        .cloned()
        .collect()
}

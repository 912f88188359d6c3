use std::{path::Path, sync::Arc, time::Duration};

use anyhow::Context;
use tokio::fs;

use crate::{
    downloader::StreamDownloader,
    page::{PageDriver, WaitPolicy},
    types::{DiscoveredLink, HarvestError, LinkKind, OutputFile, StreamManifestEvent, VideoOutcome},
    utils::PathLocks,
};

pub const DEFAULT_MANIFEST_MARKER: &str = ".m3u8";
pub const DEFAULT_MANIFEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_NETWORK_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct VideoAcquirer {
    downloader: Arc<dyn StreamDownloader>,
    locks: Arc<PathLocks>,
    manifest_marker: String,
    manifest_timeout: Duration,
    network_idle_timeout: Duration,
}

impl VideoAcquirer {
    pub fn new(
        downloader: Arc<dyn StreamDownloader>,
        locks: Arc<PathLocks>,
        manifest_marker: &str,
        manifest_timeout: Duration,
        network_idle_timeout: Duration,
    ) -> Self {
        VideoAcquirer {
            downloader,
            locks,
            manifest_marker: manifest_marker.into(),
            manifest_timeout,
            network_idle_timeout,
        }
    }

    pub async fn acquire(
        &self,
        page: &dyn PageDriver,
        link: &DiscoveredLink,
        dest_root: &Path,
    ) -> anyhow::Result<VideoOutcome> {
        let folder = link.destination(dest_root);
        fs::create_dir_all(&folder)
            .await
            .context(format!("could not create {:?}", folder))?;

        // the manifest may be requested as soon as the page loads, so observe first
        let marker = self.manifest_marker.clone();
        let subscription = page.observe_requests(Arc::new(move |url: &str| url.contains(&marker)))?;

        page.navigate(&link.url, WaitPolicy::DomContentLoaded).await?;
        if let Err(e) = page.wait_for_network_idle(self.network_idle_timeout).await {
            warn!("{} did not settle: {:#}", link.url, e);
        }
        self.start_playback(page).await?;

        let manifest_url = match subscription.first_match(self.manifest_timeout).await {
            Some(url) => url,
            None => {
                return Err(HarvestError::ManifestTimeout {
                    url: link.url.clone(),
                    waited: self.manifest_timeout,
                }
                .into())
            }
        };
        info!("found stream manifest {}", manifest_url);

        let event = StreamManifestEvent {
            manifest_url,
            owner_folder: folder,
        };
        self.download(event).await
    }

    async fn start_playback(&self, page: &dyn PageDriver) -> anyhow::Result<()> {
        match page.viewport_size().await? {
            Some(viewport) => {
                let (x, y) = viewport.center();
                page.click(x, y).await?;
                debug!("clicked at the center of the page: ({}, {})", x, y);
            }
            None => warn!("viewport size is not available, playback not triggered"),
        }
        Ok(())
    }

    async fn download(&self, event: StreamManifestEvent) -> anyhow::Result<VideoOutcome> {
        let path = self.locks.reserve_video_path(&event.owner_folder).await?;
        info!("downloading video to {:?}", path);

        let res = self.downloader.download(&event.manifest_url, &path).await;
        self.locks.release(&path).await;
        let out = res?;

        if out.exit_code == 0 {
            info!("download completed: {:?}", path);
        } else {
            error!(
                "error downloading video {} (exit code {}): {}",
                event.manifest_url, out.exit_code, out.stderr
            );
        }

        Ok(VideoOutcome {
            output: OutputFile {
                path,
                kind: LinkKind::Video,
            },
            exit_code: out.exit_code,
            stderr: out.stderr,
        })
    }
}

use std::{path::Path, sync::Arc};

use anyhow::Context;
use image::ImageFormat;
use serde_json::Value;
use tokio::fs;

use crate::{
    fetcher::HttpFetch,
    page::{PageDriver, WaitPolicy},
    types::{DiscoveredLink, HarvestError, ImageAsset, PhotoReport},
    utils::{basename, partial_path, PathLocks},
};

/// Path fragment the site serves original-resolution images under.
pub const DEFAULT_STORAGE_MARKER: &str = "storage/images/";

fn image_sources_script(marker: &str) -> String {
    format!(
        r#"Array.from(document.querySelectorAll('img[src*={}]')).map(img => img.src)"#,
        Value::String(marker.to_string())
    )
}

/// Decodes the whole payload; a recognised header alone is not enough.
pub fn validate_image(bytes: &[u8]) -> Result<ImageFormat, image::ImageError> {
    let format = image::guess_format(bytes)?;
    image::load_from_memory_with_format(bytes, format)?;
    Ok(format)
}

enum Fetched {
    Written,
    Skipped,
}

pub struct PhotoAcquirer {
    fetcher: Arc<dyn HttpFetch>,
    locks: Arc<PathLocks>,
    storage_marker: String,
}

impl PhotoAcquirer {
    pub fn new(fetcher: Arc<dyn HttpFetch>, locks: Arc<PathLocks>, storage_marker: &str) -> Self {
        PhotoAcquirer {
            fetcher,
            locks,
            storage_marker: storage_marker.into(),
        }
    }

    pub async fn acquire(
        &self,
        page: &dyn PageDriver,
        link: &DiscoveredLink,
        dest_root: &Path,
    ) -> anyhow::Result<PhotoReport> {
        page.navigate(&link.url, WaitPolicy::Load).await?;
        let sources = self.image_sources(page).await?;
        debug!("found {} image(s) on {}", sources.len(), link.url);

        let folder = link.destination(dest_root);
        fs::create_dir_all(&folder)
            .await
            .context(format!("could not create {:?}", folder))?;

        let mut report = PhotoReport::default();
        for source in sources {
            let local_filename = match basename(&source) {
                Some(name) => name,
                None => {
                    warn!("no file name in image url {}, skipping", source);
                    report.failed += 1;
                    continue;
                }
            };
            let asset = ImageAsset {
                source_url: source,
                owner_folder: folder.clone(),
                local_filename,
            };

            match self.fetch_one(&asset).await {
                Ok(Fetched::Written) => {
                    debug!("downloaded {} to {:?}", asset.local_filename, folder);
                    report.written += 1;
                }
                Ok(Fetched::Skipped) => {
                    debug!("skipping {} as it already exists", asset.local_filename);
                    report.skipped += 1;
                }
                Err(e) => {
                    warn!("could not download {}: {:#}", asset.source_url, e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "{}: {} written, {} skipped, {} failed",
            link.url, report.written, report.skipped, report.failed
        );
        Ok(report)
    }

    async fn image_sources(&self, page: &dyn PageDriver) -> anyhow::Result<Vec<String>> {
        let v = page
            .evaluate(&image_sources_script(&self.storage_marker))
            .await
            .context("could not collect image sources")?;
        let sources: Option<Vec<String>> = serde_json::from_value(v)
            .map_err(|e| HarvestError::Script(format!("image sources are not a list: {}", e)))?;
        Ok(sources.unwrap_or_default())
    }

    async fn fetch_one(&self, asset: &ImageAsset) -> anyhow::Result<Fetched> {
        let path = asset.path();
        let lock = self.locks.lock_for(&asset.owner_folder).await;
        let _guard = lock.lock().await;

        if fs::try_exists(&path).await? {
            return Ok(Fetched::Skipped);
        }

        let res = self.fetcher.get(&asset.source_url).await?;
        if res.status != 200 {
            return Err(HarvestError::HttpStatus {
                url: asset.source_url.clone(),
                status: res.status,
            }
            .into());
        }

        let body = res.body;
        let (body, valid) = tokio::task::spawn_blocking(move || {
            let valid = validate_image(&body).map_err(|e| e.to_string());
            (body, valid)
        })
        .await
        .context("image validation task failed")?;
        if let Err(cause) = valid {
            return Err(HarvestError::InvalidImage {
                url: asset.source_url.clone(),
                cause,
            }
            .into());
        }

        let tmp = partial_path(&path);
        if let Err(e) = fs::write(&tmp, &body).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e).context(format!("could not write {:?}", tmp));
        }
        fs::rename(&tmp, &path)
            .await
            .context(format!("could not move {:?} into place", path))?;

        Ok(Fetched::Written)
    }
}

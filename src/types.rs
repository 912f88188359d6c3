use std::{
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("navigation to {url} failed: {cause}")]
    Navigation { url: String, cause: String },
    #[error("script evaluation failed: {0}")]
    Script(String),
    #[error("unexpected status {status} for {url}")]
    HttpStatus { url: String, status: u16 },
    #[error("invalid image at {url}: {cause}")]
    InvalidImage { url: String, cause: String },
    #[error("no stream manifest observed for {url} within {waited:?}")]
    ManifestTimeout { url: String, waited: Duration },
    #[error("downloader exited with code {code}: {stderr}")]
    DownloaderFailed { code: i32, stderr: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkKind {
    Photo,
    Video,
}

impl LinkKind {
    /// Name of the sub-folder under the owner folder where this kind is stored.
    pub fn folder(&self) -> &'static str {
        match self {
            LinkKind::Photo => "photos",
            LinkKind::Video => "videos",
        }
    }
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkKind::Photo => write!(f, "photo"),
            LinkKind::Video => write!(f, "video"),
        }
    }
}

/// A detail-page link that survived classification.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DiscoveredLink {
    pub url: String,
    pub kind: LinkKind,
    pub owner: String,
    pub id: String,
}

impl DiscoveredLink {
    /// `<root>/<owner>/<photos|videos>`
    pub fn destination(&self, root: &Path) -> PathBuf {
        root.join(&self.owner).join(self.kind.folder())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAsset {
    pub source_url: String,
    pub owner_folder: PathBuf,
    pub local_filename: String,
}

impl ImageAsset {
    pub fn path(&self) -> PathBuf {
        self.owner_folder.join(&self.local_filename)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamManifestEvent {
    pub manifest_url: String,
    pub owner_folder: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFile {
    pub path: PathBuf,
    pub kind: LinkKind,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PhotoReport {
    pub written: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoOutcome {
    pub output: OutputFile,
    pub exit_code: i32,
    pub stderr: String,
}

impl VideoOutcome {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquisitionResult {
    Photos(PhotoReport),
    Video(VideoOutcome),
}

#[derive(Debug, Clone)]
pub struct LinkOutcome {
    pub link: DiscoveredLink,
    pub result: Result<AcquisitionResult, String>,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    /// links handed to an acquirer
    pub processed: usize,
    /// queued links never dispatched because termination was requested
    pub pending: usize,
    pub photos_written: usize,
    pub videos_downloaded: usize,
    pub failures: Vec<(String, String)>,
    /// every classified link in harvest order, repeats included
    pub links: Vec<DiscoveredLink>,
}

impl RunSummary {
    /// `queued` counts the distinct links put up for acquisition.
    pub fn from_outcomes(links: Vec<DiscoveredLink>, queued: usize, outcomes: &[LinkOutcome]) -> Self {
        let mut summary = RunSummary {
            processed: outcomes.len(),
            pending: queued.saturating_sub(outcomes.len()),
            links,
            ..Default::default()
        };

        for outcome in outcomes {
            match &outcome.result {
                Ok(AcquisitionResult::Photos(report)) => {
                    summary.photos_written += report.written;
                }
                Ok(AcquisitionResult::Video(video)) if video.succeeded() => {
                    summary.videos_downloaded += 1;
                }
                Ok(AcquisitionResult::Video(video)) => {
                    let e = HarvestError::DownloaderFailed {
                        code: video.exit_code,
                        stderr: video.stderr.clone(),
                    };
                    summary.failures.push((outcome.link.url.clone(), e.to_string()));
                }
                Err(e) => summary.failures.push((outcome.link.url.clone(), e.clone())),
            }
        }
        summary
    }
}

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{anyhow, Context};
use reqwest::Url;
use tokio::{fs, sync::Mutex};

use crate::types::DiscoveredLink;

pub const DEFAULT_LINKS_FILE: &str = "links.txt";
pub const VIDEO_PREFIX: &str = "video";
pub const VIDEO_EXTENSION: &str = "mp4";

/// Local file name for a remote asset: the last path segment of the url.
pub fn basename(url: &str) -> Option<String> {
    let u = Url::parse(url).ok()?;
    let name = u.path_segments()?.last()?;
    match name {
        "" | "." | ".." => None,
        n => Some(n.to_string()),
    }
}

pub fn site_host(url: &str) -> anyhow::Result<String> {
    let u = Url::parse(url).context(format!("url passed is invalid {}", url))?;
    match u.host_str() {
        Some(h) => Ok(h.to_string()),
        None => Err(anyhow!("url must have a valid host")),
    }
}

/// `video0001.mp4`, `video0002.mp4`, ...
pub fn video_file_name(n: u32) -> String {
    format!("{}{:04}.{}", VIDEO_PREFIX, n, VIDEO_EXTENSION)
}

/// Sibling path a photo is written to before being renamed into place.
pub fn partial_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.part", name))
}

/// Overwrites `path` with one url per line, in the given order.
pub async fn write_links(path: &Path, links: &[DiscoveredLink]) -> anyhow::Result<()> {
    let mut body = String::new();
    for link in links {
        body.push_str(&link.url);
        body.push('\n');
    }
    fs::write(path, body)
        .await
        .context(format!("could not write link dump to {:?}", path))?;
    Ok(())
}

/// Guards the destination tree when several acquirers run at once.
///
/// Locks are keyed by directory, so the map holds one entry per owner folder.
/// Photos hold their folder's lock around the exists-check and write. Videos reserve
/// their output name under the videos folder's lock; the reservation is held until
/// the downloader returns, so two workers never pick the same `video%04d.mp4`.
#[derive(Default)]
pub struct PathLocks {
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
    reserved: Mutex<HashSet<PathBuf>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Reserves the lowest-numbered `video%04d.mp4` in `dir` that neither exists on
    /// disk nor is reserved by another in-flight download.
    pub async fn reserve_video_path(&self, dir: &Path) -> anyhow::Result<PathBuf> {
        let lock = self.lock_for(dir).await;
        let _guard = lock.lock().await;

        let mut reserved = self.reserved.lock().await;
        let mut n = 1u32;
        loop {
            let candidate = dir.join(video_file_name(n));
            let exists = fs::try_exists(&candidate)
                .await
                .context(format!("could not check {:?}", candidate))?;
            if !exists && !reserved.contains(&candidate) {
                reserved.insert(candidate.clone());
                return Ok(candidate);
            }
            n = n
                .checked_add(1)
                .ok_or_else(|| anyhow!("no free video file name left in {:?}", dir))?;
        }
    }

    pub async fn release(&self, path: &Path) {
        self.reserved.lock().await.remove(path);
    }

    /// Number of directories with a lock.
    pub async fn tracked(&self) -> usize {
        self.locks.lock().await.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::types::LinkKind;

    macro_rules! aw {
        ($e:expr) => {
            tokio_test::block_on($e)
        };
    }

    #[test]
    fn basename_ignores_query_and_fragment() {
        assert_eq!(
            basename("https://cdn.site/storage/images/ab/cd/pic.jpg?v=2#x").as_deref(),
            Some("pic.jpg")
        );
        assert_eq!(basename("https://cdn.site/"), None);
        assert_eq!(basename("not a url"), None);
    }

    #[test]
    fn video_names_are_zero_padded() {
        assert_eq!(video_file_name(1), "video0001.mp4");
        assert_eq!(video_file_name(42), "video0042.mp4");
        assert_eq!(video_file_name(12345), "video12345.mp4");
    }

    #[test]
    fn partial_path_is_a_hidden_sibling() {
        assert_eq!(
            partial_path(Path::new("/a/b/pic.jpg")),
            PathBuf::from("/a/b/.pic.jpg.part")
        );
    }

    #[test]
    fn site_host_requires_a_host() {
        assert_eq!(site_host("https://site.example/a").unwrap(), "site.example");
        assert!(site_host("nope").is_err());
    }

    #[test]
    fn reserves_the_lowest_free_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("video0001.mp4"), b"x").unwrap();
        std::fs::write(dir.path().join("video0003.mp4"), b"x").unwrap();

        let locks = PathLocks::new();
        let first = aw!(locks.reserve_video_path(dir.path())).unwrap();
        assert_eq!(first, dir.path().join("video0002.mp4"));

        // still reserved, so the next caller skips it as well as 0003
        let second = aw!(locks.reserve_video_path(dir.path())).unwrap();
        assert_eq!(second, dir.path().join("video0004.mp4"));

        aw!(locks.release(&first));
        let third = aw!(locks.reserve_video_path(dir.path())).unwrap();
        assert_eq!(third, dir.path().join("video0002.mp4"));
    }

    #[test]
    fn link_dump_is_replaced_not_appended() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_LINKS_FILE);
        std::fs::write(&path, "stale\nlines\nhere\n").unwrap();

        let links = vec![
            DiscoveredLink {
                url: "https://site/a/photo/1".into(),
                kind: LinkKind::Photo,
                owner: "a".into(),
                id: "1".into(),
            },
            DiscoveredLink {
                url: "https://site/a/video/2".into(),
                kind: LinkKind::Video,
                owner: "a".into(),
                id: "2".into(),
            },
        ];
        aw!(write_links(&path, &links)).unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "https://site/a/photo/1\nhttps://site/a/video/2\n"
        );
    }
}

use std::{
    path::{Path, PathBuf},
    process::Stdio,
};

use anyhow::Context;
use async_trait::async_trait;
use tokio::process::Command;

pub const DEFAULT_DOWNLOADER: &str = "yt-dlp";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOutput {
    pub exit_code: i32,
    pub stderr: String,
}

/// Materialises a streamed manifest into a single file.
#[async_trait]
pub trait StreamDownloader: Send + Sync {
    async fn download(&self, manifest_url: &str, output: &Path) -> anyhow::Result<DownloadOutput>;
}

/// Runs yt-dlp as a blocking child process per manifest.
pub struct YtDlp {
    program: PathBuf,
}

impl Default for YtDlp {
    fn default() -> Self {
        Self::new(DEFAULT_DOWNLOADER)
    }
}

impl YtDlp {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        YtDlp {
            program: program.into(),
        }
    }

    fn command(&self, manifest_url: &str, output: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-o")
            .arg(output)
            .arg(manifest_url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl StreamDownloader for YtDlp {
    async fn download(&self, manifest_url: &str, output: &Path) -> anyhow::Result<DownloadOutput> {
        debug!("running {:?} for {}", self.program, manifest_url);
        let out = self
            .command(manifest_url, output)
            .output()
            .await
            .context(format!("could not run {:?}", self.program))?;

        Ok(DownloadOutput {
            // killed by a signal
            exit_code: out.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    macro_rules! aw {
        ($e:expr) => {
            tokio_test::block_on($e)
        };
    }

    #[test]
    fn missing_binary_is_an_error() {
        let d = YtDlp::new("/nonexistent/yt-dlp-binary");
        let res = aw!(d.download("https://cdn/x.m3u8", Path::new("/tmp/out.mp4")));
        assert!(res.is_err());
    }

    #[cfg(unix)]
    #[test]
    fn reports_the_exit_code_of_the_tool() {
        // `false` ignores its arguments and exits 1
        let d = YtDlp::new("false");
        let res = aw!(d.download("https://cdn/x.m3u8", Path::new("/tmp/out.mp4"))).unwrap();
        assert_eq!(res.exit_code, 1);
    }
}

use std::time::Duration;

use anyhow::Context;
use serde_json::Value;
use tokio::time::sleep;

use crate::{page::PageDriver, types::HarvestError};

pub const SCROLL_HEIGHT_SCRIPT: &str = "document.body.scrollHeight";
pub const SCROLL_TO_BOTTOM_SCRIPT: &str = "window.scrollTo(0, document.body.scrollHeight)";
pub const ANCHOR_HREFS_SCRIPT: &str =
    "Array.from(document.querySelectorAll('a')).map(a => a.href)";

pub const DEFAULT_SETTLE: Duration = Duration::from_millis(2000);
pub const DEFAULT_MAX_CYCLES: u32 = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlReport {
    /// every anchor href, in document order
    pub links: Vec<String>,
    pub cycles: u32,
    pub converged: bool,
    pub final_height: u64,
}

/// Scrolls an infinite-scroll listing until its height stops changing, then harvests
/// the anchors.
#[derive(Debug, Clone)]
pub struct PaginationCrawler {
    settle: Duration,
    max_cycles: u32,
}

impl Default for PaginationCrawler {
    fn default() -> Self {
        Self::new(DEFAULT_SETTLE, DEFAULT_MAX_CYCLES)
    }
}

impl PaginationCrawler {
    pub fn new(settle: Duration, max_cycles: u32) -> Self {
        PaginationCrawler { settle, max_cycles }
    }

    pub async fn crawl(&self, page: &dyn PageDriver) -> anyhow::Result<CrawlReport> {
        let mut previous = self.measure(page).await?;
        let mut cycles = 0;
        let mut converged = false;

        while cycles < self.max_cycles {
            page.evaluate(SCROLL_TO_BOTTOM_SCRIPT)
                .await
                .context("could not scroll to the bottom of the page")?;
            sleep(self.settle).await;

            let current = self.measure(page).await?;
            cycles += 1;
            debug!("scroll cycle {}: height {} -> {}", cycles, previous, current);
            if current == previous {
                converged = true;
                break;
            }
            previous = current;
        }

        if converged {
            info!("reached the bottom of the page after {} cycles", cycles);
        } else {
            warn!(
                "page still growing after {} scroll cycles (height {}), harvesting anyway",
                cycles, previous
            );
        }

        let links = self.harvest(page).await?;
        debug!("harvested {} anchors", links.len());

        Ok(CrawlReport {
            links,
            cycles,
            converged,
            final_height: previous,
        })
    }

    async fn measure(&self, page: &dyn PageDriver) -> anyhow::Result<u64> {
        let v = page
            .evaluate(SCROLL_HEIGHT_SCRIPT)
            .await
            .context("could not measure the page height")?;
        match v.as_u64().or_else(|| v.as_f64().map(|f| f as u64)) {
            Some(h) => Ok(h),
            None => Err(HarvestError::Script(format!("scroll height is not a number: {}", v)).into()),
        }
    }

    async fn harvest(&self, page: &dyn PageDriver) -> anyhow::Result<Vec<String>> {
        let v = page
            .evaluate(ANCHOR_HREFS_SCRIPT)
            .await
            .context("could not collect anchors")?;
        let links = match v {
            Value::Array(items) => items
                .into_iter()
                .filter_map(|i| match i {
                    Value::String(s) => Some(s),
                    _ => None,
                })
                .collect(),
            Value::Null => vec![],
            other => {
                return Err(HarvestError::Script(format!("anchors are not a list: {}", other)).into())
            }
        };
        Ok(links)
    }
}

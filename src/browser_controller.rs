use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use headless_chrome::{
    browser::{default_executable, tab::point::Point},
    protocol::cdp::{types::Event, Network},
    Browser, LaunchOptions, Tab,
};
use serde::Deserialize;
use serde_json::Value;
use sysinfo::{Pid, PidExt, ProcessExt, System, SystemExt};
use tokio::{task, time::sleep};

use crate::{
    config::UserConfig,
    page::{PageDriver, PageSource, RequestMatcher, RequestSubscription, Viewport, WaitPolicy},
    types::HarvestError,
};

// long enough to outlive a stream download on a single worker
const BROWSER_IDLE_TIMEOUT: Duration = Duration::from_secs(60 * 60);
const LOAD_TIMEOUT: Duration = Duration::from_secs(30);
const POLL_INTERVAL: Duration = Duration::from_millis(250);
const QUIET_PERIOD: Duration = Duration::from_millis(500);

const READY_STATE_SCRIPT: &str = "document.readyState";
const NETWORK_STATE_SCRIPT: &str =
    "({ ready: document.readyState, resources: performance.getEntriesByType('resource').length })";
const VIEWPORT_SCRIPT: &str = "({ width: window.innerWidth, height: window.innerHeight })";

#[derive(Deserialize)]
struct NetworkState {
    ready: String,
    resources: u64,
}

/// Owns the Chrome process and the identity every page is opened with.
pub struct BrowserController {
    browser: Mutex<Browser>,
    user_agent: String,
    cookies: Vec<Network::CookieParam>,
}

impl BrowserController {
    pub fn new(config: &UserConfig, headless: bool) -> Result<Self> {
        let cookies = config
            .cookies
            .iter()
            .map(|c| {
                serde_json::from_value::<Network::CookieParam>(c.clone())
                    .context(format!("invalid cookie {}", c))
            })
            .collect::<Result<Vec<_>>>()?;

        let is_docker = std::env::var("IN_DOCKER").is_ok();
        let options = LaunchOptions::default_builder()
            .path(Some(default_executable().map_err(|e| anyhow!(e))?))
            .headless(headless)
            .window_size(Some((1920, 1080)))
            .idle_browser_timeout(BROWSER_IDLE_TIMEOUT)
            // warning only do this if in docker env
            .sandbox(!is_docker)
            .build()
            .map_err(|e| anyhow!("invalid browser launch options: {}", e))?;
        let browser = Browser::new(options).context("browser launching error")?;

        Ok(BrowserController {
            browser: Mutex::new(browser),
            user_agent: config.user_agent.clone(),
            cookies,
        })
    }

    pub fn kill(&self) -> bool {
        let pid = match self.browser.lock() {
            Ok(browser) => browser.get_process_id(),
            Err(_) => None,
        };
        let pid = match pid {
            Some(pid) => pid,
            None => return false,
        };
        let mut s = System::new();
        s.refresh_processes();
        if let Some(process) = s.process(Pid::from_u32(pid)) {
            debug!("killing process with id {}", pid);
            process.kill();
            return true;
        }
        false
    }
}

#[async_trait]
impl PageSource for BrowserController {
    async fn new_page(&self) -> Result<Arc<dyn PageDriver>> {
        let tab = {
            let browser = self
                .browser
                .lock()
                .map_err(|_| anyhow!("browser handle poisoned"))?;
            browser.new_tab().context("could not create new tab")?
        };

        tab.set_user_agent(&self.user_agent, None, None)
            .context("could not set user agent")?;
        if !self.cookies.is_empty() {
            tab.set_cookies(self.cookies.clone())
                .context("could not set cookies")?;
        }
        // request events are only emitted once the network domain is on
        tab.call_method(Network::Enable {
            max_total_buffer_size: None,
            max_resource_buffer_size: None,
            max_post_data_size: None,
        })
        .context("could not enable network events")?;

        Ok(Arc::new(ChromePage { tab }))
    }
}

impl Drop for BrowserController {
    fn drop(&mut self) {
        debug!("killing browser process...");
        self.kill();
    }
}

/// One Chrome tab. headless_chrome blocks, so every call runs on the blocking pool.
pub struct ChromePage {
    tab: Arc<Tab>,
}

impl ChromePage {
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(Arc<Tab>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let tab = self.tab.clone();
        task::spawn_blocking(move || f(tab))
            .await
            .context("browser task panicked")?
    }

    async fn wait_for_ready_state(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.evaluate(READY_STATE_SCRIPT).await? == Value::String("complete".into()) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                warn!("page did not finish loading within {:?}", timeout);
                return Ok(());
            }
            sleep(POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl PageDriver for ChromePage {
    async fn navigate(&self, url: &str, wait: WaitPolicy) -> Result<()> {
        debug!("navigating to {}", url);
        let target = url.to_string();
        self.blocking(move |tab| {
            tab.navigate_to(&target)
                .and_then(|t| t.wait_until_navigated())
                .map_err(|e| HarvestError::Navigation {
                    url: target.clone(),
                    cause: e.to_string(),
                })?;
            Ok(())
        })
        .await?;

        if wait == WaitPolicy::Load {
            self.wait_for_ready_state(LOAD_TIMEOUT).await?;
        }
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> Result<Value> {
        // remote objects are not returned by value, so round-trip through JSON
        let expression = format!("JSON.stringify(({}))", script);
        self.blocking(move |tab| {
            let obj = tab
                .evaluate(&expression, true)
                .map_err(|e| HarvestError::Script(e.to_string()))?;
            match obj.value {
                Some(Value::String(s)) => Ok(serde_json::from_str(&s)?),
                _ => Ok(Value::Null),
            }
        })
        .await
    }

    async fn wait_for_network_idle(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut last: Option<(u64, Instant)> = None;
        loop {
            let state: NetworkState = serde_json::from_value(self.evaluate(NETWORK_STATE_SCRIPT).await?)?;
            let now = Instant::now();
            last = match last {
                Some((count, since)) if count == state.resources => {
                    if state.ready == "complete" && now.duration_since(since) >= QUIET_PERIOD {
                        return Ok(());
                    }
                    Some((count, since))
                }
                _ => Some((state.resources, now)),
            };
            if now >= deadline {
                return Err(anyhow!("network still busy after {:?}", timeout));
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    fn observe_requests(&self, matcher: RequestMatcher) -> Result<RequestSubscription> {
        let (first, subscription) = RequestSubscription::channel();
        let listener = self
            .tab
            .add_event_listener(Arc::new(move |event: &Event| {
                if let Event::NetworkRequestWillBeSent(e) = event {
                    let url = &e.params.request.url;
                    if matcher(url) && first.offer(url) {
                        debug!("observed matching request {}", url);
                    }
                }
            }))
            .context("could not observe network requests")?;

        let tab = self.tab.clone();
        Ok(subscription.on_detach(move || {
            if let Err(e) = tab.remove_event_listener(&listener) {
                warn!("could not remove request listener: {}", e);
            }
        }))
    }

    async fn click(&self, x: f64, y: f64) -> Result<()> {
        self.blocking(move |tab| {
            tab.click_point(Point { x, y })?;
            Ok(())
        })
        .await
    }

    async fn viewport_size(&self) -> Result<Option<Viewport>> {
        let v = self.evaluate(VIEWPORT_SCRIPT).await?;
        let viewport: Option<Viewport> = serde_json::from_value(v).ok();
        Ok(viewport.filter(|v| v.width > 0 && v.height > 0))
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

    /*
    RUST_LOG=debug cargo test --lib browser_controller -- --ignored
     */
    #[test]
    #[ignore = "browser"]
    fn opens_a_page_and_measures_it() -> anyhow::Result<()> {
        let browser = BrowserController::new(&UserConfig::default(), true)?;
        let page = aw!(browser.new_page())?;
        aw!(page.navigate("https://example.com", WaitPolicy::Load))?;

        let height = aw!(page.evaluate("document.body.scrollHeight"))?;
        assert!(height.as_u64().unwrap_or(0) > 0);
        assert!(aw!(page.viewport_size())?.is_some());
        Ok(())
    }
}

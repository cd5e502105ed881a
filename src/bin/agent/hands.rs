use anyhow::{Result, anyhow};
use async_trait::async_trait;
use headless_chrome::protocol::cdp::Target::CreateTarget;
use headless_chrome::{Browser, LaunchOptions, Tab};
use phantom_agent::{
    ActionKind, ActionResult, PageContext, PageContextProvider, SessionHandle, SessionProvider,
};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::dom;

pub struct LaunchConfig {
    pub attach_url: String,
    pub headless: bool,
    pub profile_dir: Option<PathBuf>,
}

/// The browser the agent drives. The first tab is the user's page.
pub struct ChromeBrowser {
    browser: Arc<Browser>,
    foreground: Arc<Tab>,
}

impl ChromeBrowser {
    pub fn launch(config: &LaunchConfig) -> Result<Self> {
        // 1. Try to connect to an existing Chrome (attach mode)
        info!(url = %config.attach_url, "attempting to attach to existing Chrome");
        if let Ok(browser) = Browser::connect(config.attach_url.clone()) {
            info!("attached to existing Chrome");
            let existing = {
                let tabs = browser.get_tabs();
                let tabs = tabs
                    .lock()
                    .map_err(|_| anyhow!("Chrome tab list lock poisoned"))?;
                tabs.first().cloned()
            };
            let foreground = match existing {
                Some(tab) => tab,
                None => browser.new_tab()?,
            };
            return Ok(Self {
                browser: Arc::new(browser),
                foreground,
            });
        }

        warn!("could not attach, launching Chrome with the agent profile");

        // Persistent profile so logins made inside the agent survive restarts.
        let profile = match &config.profile_dir {
            Some(dir) => dir.clone(),
            None => default_profile_dir(dirs::data_local_dir())?,
        };
        std::fs::create_dir_all(&profile)?;
        debug!(profile = %profile.display(), "using agent profile");

        let options = LaunchOptions {
            headless: config.headless,
            path: std::env::var_os("CHROME_PATH").map(PathBuf::from),
            user_data_dir: Some(profile),
            args: vec![
                std::ffi::OsStr::new("--no-first-run"),
                std::ffi::OsStr::new("--no-default-browser-check"),
                std::ffi::OsStr::new("--disable-infobars"),
                std::ffi::OsStr::new("--password-store=basic"),
            ],
            idle_browser_timeout: std::time::Duration::from_secs(600),
            ..Default::default()
        };

        let browser =
            Browser::new(options).map_err(|e| anyhow!("Browser launch failed: {}", e))?;
        let foreground = browser.new_tab()?;
        foreground.navigate_to("about:blank")?;
        info!("Chrome ready");

        Ok(Self {
            browser: Arc::new(browser),
            foreground,
        })
    }

    pub fn sessions(&self) -> ChromeSessions {
        ChromeSessions {
            browser: self.browser.clone(),
            tabs: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn active_page(&self) -> ActivePage {
        ActivePage {
            tab: self.foreground.clone(),
        }
    }
}

/// `<local data>/phantom-agent/profile`, falling back to the working directory.
fn default_profile_dir(local_data: Option<PathBuf>) -> Result<PathBuf> {
    let base = match local_data {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    Ok(base.join("phantom-agent").join("profile"))
}

/// Blank tab opened without taking focus from the user's page.
fn background_tab() -> CreateTarget {
    CreateTarget {
        url: "about:blank".to_string(),
        left: None,
        top: None,
        width: None,
        height: None,
        window_state: None,
        browser_context_id: None,
        enable_begin_frame_control: None,
        new_window: None,
        background: Some(true),
        for_tab: None,
        hidden: None,
    }
}

/// headless_chrome is synchronous; keep it off the async workers.
async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| anyhow!("browser task panicked: {}", e))?
}

/// Mission sessions, one background tab each.
pub struct ChromeSessions {
    browser: Arc<Browser>,
    tabs: Mutex<HashMap<SessionHandle, Arc<Tab>>>,
    next_id: AtomicU64,
}

impl ChromeSessions {
    fn tab(&self, handle: SessionHandle) -> Result<Arc<Tab>> {
        self.tabs
            .lock()
            .map_err(|_| anyhow!("session table lock poisoned"))?
            .get(&handle)
            .cloned()
            .ok_or_else(|| anyhow!("unknown {}", handle))
    }
}

#[async_trait]
impl SessionProvider for ChromeSessions {
    async fn create(&self) -> Result<SessionHandle> {
        let browser = self.browser.clone();
        let tab = blocking(move || browser.new_tab_with_options(background_tab()))
            .await?;
        let handle = SessionHandle(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.tabs
            .lock()
            .map_err(|_| anyhow!("session table lock poisoned"))?
            .insert(handle, tab);
        debug!(%handle, "session created");
        Ok(handle)
    }

    async fn destroy(&self, handle: SessionHandle) -> Result<()> {
        let tab = self
            .tabs
            .lock()
            .map_err(|_| anyhow!("session table lock poisoned"))?
            .remove(&handle)
            .ok_or_else(|| anyhow!("unknown {}", handle))?;
        blocking(move || tab.close(true).map(|_| ())).await?;
        debug!(%handle, "session destroyed");
        Ok(())
    }

    async fn navigate(&self, handle: SessionHandle, url: &str) -> Result<()> {
        let tab = self.tab(handle)?;
        let url = url.to_string();
        blocking(move || {
            tab.navigate_to(&url)?;
            Ok(())
        })
        .await
    }

    async fn wait_for_load(&self, handle: SessionHandle) -> Result<()> {
        let tab = self.tab(handle)?;
        blocking(move || {
            tab.wait_until_navigated()?;
            Ok(())
        })
        .await
    }

    async fn run_action(
        &self,
        handle: SessionHandle,
        kind: ActionKind,
        selector: &str,
        value: Option<&str>,
    ) -> Result<ActionResult> {
        let tab = self.tab(handle)?;
        let script = dom::action_script(kind, selector, value);
        let raw = blocking(move || dom::eval_string(&tab, &script)).await?;
        dom::parse_action_result(kind, &raw)
    }

    async fn poll_presence(&self, handle: SessionHandle, selector: &str) -> Result<bool> {
        let tab = self.tab(handle)?;
        let script = dom::presence_script(selector);
        blocking(move || dom::eval_bool(&tab, &script)).await
    }
}

/// The user's foreground tab, read by the decision protocol.
pub struct ActivePage {
    tab: Arc<Tab>,
}

#[async_trait]
impl PageContextProvider for ActivePage {
    async fn current_url(&self) -> Result<String> {
        let tab = self.tab.clone();
        blocking(move || Ok(tab.get_url())).await
    }

    async fn capture(&self) -> Result<PageContext> {
        let tab = self.tab.clone();
        blocking(move || {
            let snapshot = dom::capture_dom_snapshot(&tab)?;
            let variables = dom::capture_variables(&tab).unwrap_or_else(|e| {
                debug!(error = %e, "page variables unavailable");
                None
            });
            Ok(PageContext {
                snapshot,
                variables,
            })
        })
        .await
    }

    async fn execute_script(&self, code: &str) -> Result<Value> {
        let tab = self.tab.clone();
        let script = dom::user_code_script(code);
        let raw = blocking(move || dom::eval_string(&tab, &script)).await?;
        dom::parse_user_code_result(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mission_tabs_open_in_background() {
        let target = background_tab();
        assert_eq!(target.url, "about:blank");
        assert_eq!(target.background, Some(true));
        assert_eq!(target.new_window, None);
    }

    #[test]
    fn profile_lives_under_local_data() {
        let dir = default_profile_dir(Some(PathBuf::from("/data/local"))).unwrap();
        assert_eq!(dir, PathBuf::from("/data/local/phantom-agent/profile"));
    }

    #[test]
    fn profile_falls_back_to_working_directory() {
        let dir = default_profile_dir(None).unwrap();
        assert_eq!(dir, std::env::current_dir().unwrap().join("phantom-agent/profile"));
    }
}

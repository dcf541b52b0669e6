use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use headless_chrome::browser::tab::point::Point;
use headless_chrome::protocol::cdp::Input;
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::brain::PLANNER_TIMEOUT;
use crate::types::{Action, ActionCall, ActionResult, SCROLL_MAGNITUDE, ScrollDirection, Viewport};

/// Chrome must outlive the slowest planner turn.
pub const IDLE_BROWSER_TIMEOUT: Duration = PLANNER_TIMEOUT.saturating_add(Duration::from_secs(60));

/// Everything the agent needs from a live browser page.
#[async_trait]
pub trait BrowserDriver: Send {
    async fn navigate(&mut self, url: &str) -> Result<()>;
    async fn click(&mut self, x: i64, y: i64) -> Result<()>;
    async fn type_text(&mut self, text: &str) -> Result<()>;
    async fn press_key(&mut self, key: &str) -> Result<()>;
    /// Select everything in the focused element and delete it.
    async fn clear_focused(&mut self) -> Result<()>;
    async fn scroll_by(&mut self, delta_y: i64) -> Result<()>;
    async fn go_back(&mut self) -> Result<()>;
    async fn screenshot(&mut self) -> Result<Vec<u8>>;
    async fn current_url(&mut self) -> Result<String>;
    /// Wait until the page reports it has finished loading. Returns `false`
    /// if `timeout` elapsed first.
    async fn wait_for_load(&mut self, timeout: Duration) -> Result<bool>;
    async fn close(&mut self) -> Result<()>;
}

/// Opens browser sessions. One session per search.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    /// Fail fast if the automation backend is not installed.
    fn check(&self) -> Result<()>;
    async fn launch(&self, viewport: Viewport) -> Result<Box<dyn BrowserDriver>>;
}

#[derive(Debug, Clone)]
pub struct ChromeLauncher {
    pub headless: bool,
    pub chrome_path: Option<PathBuf>,
}

impl ChromeLauncher {
    pub fn new(headless: bool, chrome_path: Option<PathBuf>) -> Self {
        Self {
            headless,
            chrome_path,
        }
    }

    fn resolve_chrome(&self) -> Result<PathBuf> {
        if let Some(path) = &self.chrome_path {
            if path.exists() {
                return Ok(path.clone());
            }
            bail!("Chrome executable not found at {}", path.display());
        }
        find_chrome()
    }
}

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
    fn check(&self) -> Result<()> {
        self.resolve_chrome().map(|_| ())
    }

    async fn launch(&self, viewport: Viewport) -> Result<Box<dyn BrowserDriver>> {
        let chrome_path = self.resolve_chrome()?;
        let headless = self.headless;

        info!("[hands] Launching Chrome from {}", chrome_path.display());
        let driver = tokio::task::spawn_blocking(move || {
            ChromeDriver::launch(chrome_path, headless, viewport)
        })
        .await
        .map_err(|e| anyhow!("Browser launch panicked: {}", e))??;
        info!("[hands] Chrome ready ({}x{}).", viewport.width, viewport.height);

        Ok(Box::new(driver))
    }
}

/// A Chrome process plus the single tab the agent drives.
pub struct ChromeDriver {
    browser: Option<Browser>,
    tab: Arc<Tab>,
    viewport: Viewport,
}

impl ChromeDriver {
    fn launch(chrome_path: PathBuf, headless: bool, viewport: Viewport) -> Result<Self> {
        let options = LaunchOptions {
            headless,
            path: Some(chrome_path),
            window_size: Some((viewport.width, viewport.height)),
            args: vec![
                OsStr::new("--no-first-run"),
                OsStr::new("--no-default-browser-check"),
                OsStr::new("--disable-blink-features=AutomationControlled"),
                OsStr::new("--disable-infobars"),
            ],
            idle_browser_timeout: IDLE_BROWSER_TIMEOUT,
            ..Default::default()
        };

        let browser = Browser::new(options).map_err(|e| {
            warn!("[hands] Browser launch failed: {}", e);
            anyhow!("Browser launch failed: {}", e)
        })?;
        let tab = browser.new_tab().context("Failed to open a browser tab")?;

        Ok(Self {
            browser: Some(browser),
            tab,
            viewport,
        })
    }

    fn tab(&self) -> Arc<Tab> {
        Arc::clone(&self.tab)
    }
}

/// Run a blocking CDP call off the async runtime.
async fn on_tab<T, F>(tab: Arc<Tab>, f: F) -> Result<T>
where
    F: FnOnce(&Tab) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || f(&tab))
        .await
        .map_err(|e| anyhow!("Browser task panicked: {}", e))?
}

const CLEAR_FOCUSED_JS: &str = r#"
(() => {
  const el = document.activeElement;
  if (!el) return false;
  if (typeof el.select === 'function') {
    el.select();
  } else {
    document.execCommand('selectAll');
  }
  return true;
})()
"#;

#[async_trait]
impl BrowserDriver for ChromeDriver {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        let url = url.to_string();
        on_tab(self.tab(), move |tab| {
            tab.navigate_to(&url)
                .with_context(|| format!("Failed to open URL: {url}"))?;
            Ok(())
        })
        .await
    }

    async fn click(&mut self, x: i64, y: i64) -> Result<()> {
        on_tab(self.tab(), move |tab| {
            tab.click_point(Point {
                x: x as f64,
                y: y as f64,
            })?;
            Ok(())
        })
        .await
    }

    async fn type_text(&mut self, text: &str) -> Result<()> {
        let text = text.to_string();
        on_tab(self.tab(), move |tab| {
            tab.type_str(&text)?;
            Ok(())
        })
        .await
    }

    async fn press_key(&mut self, key: &str) -> Result<()> {
        let key = key.to_string();
        on_tab(self.tab(), move |tab| {
            tab.press_key(&key)?;
            Ok(())
        })
        .await
    }

    async fn clear_focused(&mut self) -> Result<()> {
        on_tab(self.tab(), |tab| {
            tab.evaluate(CLEAR_FOCUSED_JS, false)?;
            tab.press_key("Backspace")?;
            Ok(())
        })
        .await
    }

    /// Wheel event at the viewport centre, so inner scroll containers move too.
    async fn scroll_by(&mut self, delta_y: i64) -> Result<()> {
        let x = f64::from(self.viewport.width) / 2.0;
        let y = f64::from(self.viewport.height) / 2.0;
        on_tab(self.tab(), move |tab| {
            tab.call_method(Input::DispatchMouseEvent {
                Type: Input::DispatchMouseEventTypeOption::MouseWheel,
                x,
                y,
                delta_x: Some(0.0),
                delta_y: Some(delta_y as f64),
                modifiers: None,
                timestamp: None,
                button: None,
                buttons: None,
                click_count: None,
                force: None,
                tangential_pressure: None,
                tilt_x: None,
                tilt_y: None,
                twist: None,
                pointer_Type: None,
            })?;
            Ok(())
        })
        .await
    }

    async fn go_back(&mut self) -> Result<()> {
        on_tab(self.tab(), |tab| {
            tab.evaluate("window.history.back()", false)?;
            Ok(())
        })
        .await
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>> {
        on_tab(self.tab(), |tab| {
            tab.capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true)
                .context("Screenshot capture failed")
        })
        .await
    }

    async fn current_url(&mut self) -> Result<String> {
        on_tab(self.tab(), |tab| Ok(tab.get_url())).await
    }

    async fn wait_for_load(&mut self, timeout: Duration) -> Result<bool> {
        on_tab(self.tab(), move |tab| {
            let deadline = Instant::now() + timeout;
            loop {
                let state = tab
                    .evaluate("document.readyState", false)?
                    .value
                    .and_then(|v| v.as_str().map(String::from))
                    .unwrap_or_default();
                if state == "complete" {
                    return Ok(true);
                }
                if Instant::now() >= deadline {
                    return Ok(false);
                }
                std::thread::sleep(Duration::from_millis(100));
            }
        })
        .await
    }

    async fn close(&mut self) -> Result<()> {
        let closed = on_tab(self.tab(), |tab| tab.close(true)).await;
        // Dropping the handle stops the Chrome process.
        self.browser.take();
        closed.map(|_| ())
    }
}

// Helper to find Chrome executable
fn find_chrome() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("CHROME_PATH") {
        let p = PathBuf::from(path);
        if p.exists() {
            return Ok(p);
        }
    }

    let candidates = [
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        r"C:\Program Files\Google\Chrome\Application\chrome.exe",
        r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
    ];

    for path in &candidates {
        let p = PathBuf::from(path);
        if p.exists() {
            return Ok(p);
        }
    }

    headless_chrome::browser::default_executable().map_err(|e| {
        anyhow!(
            "Chrome executable not found ({}). Install Google Chrome or set CHROME_PATH.",
            e
        )
    })
}

/// Delays applied around every action.
#[derive(Debug, Clone)]
pub struct ExecutorTimings {
    pub load_timeout: Duration,
    pub settle: Duration,
    pub wait_action: Duration,
}

impl Default for ExecutorTimings {
    fn default() -> Self {
        Self {
            load_timeout: Duration::from_secs(5),
            settle: Duration::from_secs(1),
            wait_action: Duration::from_secs(5),
        }
    }
}

/// Execute one planner call. Never fails: errors become the action's result.
pub async fn execute(
    driver: &mut dyn BrowserDriver,
    viewport: Viewport,
    call: &ActionCall,
    timings: &ExecutorTimings,
) -> ActionResult {
    let result = match perform(driver, viewport, call, timings).await {
        Ok(()) => ActionResult::Ok,
        Err(e) => {
            warn!("[hands] {} failed: {:#}", call.name, e);
            ActionResult::error(format!("{:#}", e))
        }
    };

    // Pages keep rendering after the event fires.
    match driver.wait_for_load(timings.load_timeout).await {
        Ok(true) => {}
        Ok(false) => debug!("[hands] Page still loading after {:?}", timings.load_timeout),
        Err(e) => debug!("[hands] Load-state check failed: {:#}", e),
    }
    tokio::time::sleep(timings.settle).await;

    result
}

/// Execute calls in order, one result per call.
pub async fn execute_batch(
    driver: &mut dyn BrowserDriver,
    viewport: Viewport,
    calls: &[ActionCall],
    timings: &ExecutorTimings,
) -> Vec<ActionResult> {
    let mut results = Vec::with_capacity(calls.len());
    for call in calls {
        results.push(execute(driver, viewport, call, timings).await);
    }
    results
}

async fn perform(
    driver: &mut dyn BrowserDriver,
    viewport: Viewport,
    call: &ActionCall,
    timings: &ExecutorTimings,
) -> Result<()> {
    let action = Action::decode(call)
        .with_context(|| format!("Invalid arguments for {}: {}", call.name, call.args))?;
    debug!("[hands] Executing {:?}", action);

    match action {
        Action::OpenBrowser => {}
        Action::ClickAt { x, y } => {
            let (px, py) = viewport.point(x, y);
            driver.click(px, py).await?;
        }
        Action::TypeTextAt {
            x,
            y,
            text,
            press_enter,
        } => {
            let (px, py) = viewport.point(x, y);
            driver.click(px, py).await?;
            driver.clear_focused().await?;
            driver.type_text(&text).await?;
            if press_enter {
                driver.press_key("Enter").await?;
            }
        }
        Action::ScrollDocument { direction } => match direction {
            Some(ScrollDirection::Down) => driver.scroll_by(SCROLL_MAGNITUDE).await?,
            Some(ScrollDirection::Up) => driver.scroll_by(-SCROLL_MAGNITUDE).await?,
            _ => debug!("[hands] Ignoring non-vertical scroll"),
        },
        Action::Navigate { url } => driver.navigate(&url).await?,
        Action::WaitFiveSeconds => tokio::time::sleep(timings.wait_action).await,
        Action::GoBack => driver.go_back().await?,
        Action::Unsupported { name } => {
            warn!("[hands] Unsupported action '{}', skipping", name);
        }
    }

    Ok(())
}

#![allow(dead_code)]

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use moneytalks_advisor::brain::Planner;
use moneytalks_advisor::hands::{BrowserDriver, BrowserLauncher, ExecutorTimings};
use moneytalks_advisor::types::{ActionCall, Part, Turn, Viewport};
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn no_delays() -> ExecutorTimings {
    ExecutorTimings {
        load_timeout: Duration::ZERO,
        settle: Duration::ZERO,
        wait_action: Duration::ZERO,
    }
}

pub fn call(name: &str, args: Value) -> ActionCall {
    ActionCall::new(name, args)
}

pub fn reply_text(text: &str) -> Turn {
    Turn::model(vec![Part::Text(text.to_string())])
}

pub fn reply_calls(calls: Vec<ActionCall>) -> Turn {
    Turn::model(calls.into_iter().map(Part::Call).collect())
}

/// Everything a fake browser saw, shared with the test body.
#[derive(Default)]
pub struct DriverLog {
    pub ops: Vec<String>,
    pub screenshots: usize,
    pub closes: usize,
    pub url: String,
}

pub struct FakeDriver {
    pub log: Arc<Mutex<DriverLog>>,
    failing: HashSet<&'static str>,
    fail_close: bool,
}

impl FakeDriver {
    pub fn new() -> (Self, Arc<Mutex<DriverLog>>) {
        let log = Arc::new(Mutex::new(DriverLog {
            url: "about:blank".into(),
            ..Default::default()
        }));
        (
            Self {
                log: log.clone(),
                failing: HashSet::new(),
                fail_close: false,
            },
            log,
        )
    }

    /// Make every call of operation `op` (e.g. "click") fail.
    pub fn failing(mut self, op: &'static str) -> Self {
        self.failing.insert(op);
        self
    }

    pub fn fail_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    fn record(&self, op: &'static str, detail: String) -> Result<()> {
        self.log.lock().unwrap().ops.push(detail);
        if self.failing.contains(op) {
            bail!("{op} exploded");
        }
        Ok(())
    }

    pub fn ops(log: &Arc<Mutex<DriverLog>>) -> Vec<String> {
        log.lock().unwrap().ops.clone()
    }
}

#[async_trait]
impl BrowserDriver for FakeDriver {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        self.record("navigate", format!("navigate {url}"))?;
        self.log.lock().unwrap().url = url.to_string();
        Ok(())
    }

    async fn click(&mut self, x: i64, y: i64) -> Result<()> {
        self.record("click", format!("click {x} {y}"))
    }

    async fn type_text(&mut self, text: &str) -> Result<()> {
        self.record("type", format!("type {text}"))
    }

    async fn press_key(&mut self, key: &str) -> Result<()> {
        self.record("press", format!("press {key}"))
    }

    async fn clear_focused(&mut self) -> Result<()> {
        self.record("clear", "clear".to_string())
    }

    async fn scroll_by(&mut self, delta_y: i64) -> Result<()> {
        self.record("scroll", format!("scroll {delta_y}"))
    }

    async fn go_back(&mut self) -> Result<()> {
        self.record("back", "back".to_string())
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>> {
        if self.failing.contains("screenshot") {
            bail!("screenshot exploded");
        }
        self.log.lock().unwrap().screenshots += 1;
        Ok(vec![0x89, b'P', b'N', b'G'])
    }

    async fn current_url(&mut self) -> Result<String> {
        Ok(self.log.lock().unwrap().url.clone())
    }

    async fn wait_for_load(&mut self, _timeout: Duration) -> Result<bool> {
        Ok(true)
    }

    async fn close(&mut self) -> Result<()> {
        self.log.lock().unwrap().closes += 1;
        if self.fail_close {
            bail!("close exploded");
        }
        Ok(())
    }
}

/// Hands out one prepared driver.
pub struct FakeLauncher {
    driver: Mutex<Option<FakeDriver>>,
    pub launches: Mutex<usize>,
    missing: bool,
}

impl FakeLauncher {
    pub fn new(driver: FakeDriver) -> Self {
        Self {
            driver: Mutex::new(Some(driver)),
            launches: Mutex::new(0),
            missing: false,
        }
    }

    pub fn missing() -> Self {
        Self {
            driver: Mutex::new(None),
            launches: Mutex::new(0),
            missing: true,
        }
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    fn check(&self) -> Result<()> {
        if self.missing {
            bail!("Chrome executable not found");
        }
        Ok(())
    }

    async fn launch(&self, _viewport: Viewport) -> Result<Box<dyn BrowserDriver>> {
        *self.launches.lock().unwrap() += 1;
        let driver = self
            .driver
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| anyhow!("already launched"))?;
        Ok(Box::new(driver))
    }
}

/// Replays prepared replies; once they run out it keeps asking to go back.
pub struct ScriptedPlanner {
    replies: Mutex<VecDeque<Result<Turn, String>>>,
    pub seen: Mutex<Vec<Vec<Turn>>>,
    configured: bool,
}

impl ScriptedPlanner {
    pub fn new(replies: Vec<Result<Turn, String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            seen: Mutex::new(Vec::new()),
            configured: true,
        }
    }

    pub fn unconfigured() -> Self {
        Self {
            configured: false,
            ..Self::new(Vec::new())
        }
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl Planner for ScriptedPlanner {
    fn check(&self) -> Result<()> {
        if self.configured {
            Ok(())
        } else {
            bail!("GEMINI_API_KEY not set in environment")
        }
    }

    async fn plan(&self, conversation: &[Turn], _viewport: Viewport) -> Result<Turn> {
        self.seen.lock().unwrap().push(conversation.to_vec());
        match self.replies.lock().unwrap().pop_front() {
            Some(Ok(turn)) => Ok(turn),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(reply_calls(vec![call("go_back", Value::Null)])),
        }
    }
}

/// Panics the moment it is asked anything.
pub struct PanickingPlanner;

#[async_trait]
impl Planner for PanickingPlanner {
    fn check(&self) -> Result<()> {
        Ok(())
    }

    async fn plan(&self, _conversation: &[Turn], _viewport: Viewport) -> Result<Turn> {
        panic!("planner blew up");
    }
}

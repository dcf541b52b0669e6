use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::agent::{AgentLoop, LoopOutcome};
use crate::brain::{Planner, goal_prompt};
use crate::error::SearchError;
use crate::hands::{BrowserDriver, BrowserLauncher, ExecutorTimings};
use crate::types::{AgentEvent, CarSearchResult, MAX_TURNS_PER_SEARCH, SEED_URL, Viewport};

/// Runs one car search per call: opens a browser session, drives the agent
/// loop, and always tears the session down again.
pub struct CarSearch {
    planner: Arc<dyn Planner>,
    launcher: Arc<dyn BrowserLauncher>,
    viewport: Viewport,
    seed_url: String,
    max_turns: usize,
    timings: ExecutorTimings,
    events: Option<broadcast::Sender<AgentEvent>>,
}

impl CarSearch {
    pub fn new(planner: Arc<dyn Planner>, launcher: Arc<dyn BrowserLauncher>) -> Self {
        Self {
            planner,
            launcher,
            viewport: Viewport::default(),
            seed_url: SEED_URL.to_string(),
            max_turns: MAX_TURNS_PER_SEARCH,
            timings: ExecutorTimings::default(),
            events: None,
        }
    }

    pub fn viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = viewport;
        self
    }

    pub fn seed_url(mut self, seed_url: impl Into<String>) -> Self {
        self.seed_url = seed_url.into();
        self
    }

    pub fn max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn timings(mut self, timings: ExecutorTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn events(mut self, events: broadcast::Sender<AgentEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Caller-facing entry point. Never fails; fatal paths come back as
    /// `success: false` with a message.
    pub async fn run(&self, budget: f64) -> CarSearchResult {
        match self.try_run(budget).await {
            Ok(outcome) => {
                if let LoopOutcome::BudgetExhausted { .. } = outcome {
                    info!("[search] Returning partial text after turn budget ran out");
                }
                CarSearchResult::found(outcome.text().to_string())
            }
            Err(e) => {
                error!("[search] Search failed: {}", e);
                CarSearchResult::failed(e)
            }
        }
    }

    pub async fn try_run(&self, budget: f64) -> Result<LoopOutcome, SearchError> {
        if !budget.is_finite() || budget <= 0.0 {
            return Err(SearchError::InvalidBudget(budget));
        }
        self.planner
            .check()
            .map_err(SearchError::MissingPrerequisite)?;
        self.launcher
            .check()
            .map_err(SearchError::MissingPrerequisite)?;

        info!("[search] Searching for cars under ${:.0}", budget);
        let mut driver = self
            .launcher
            .launch(self.viewport)
            .await
            .map_err(SearchError::Session)?;

        let outcome = AssertUnwindSafe(self.drive(driver.as_mut(), budget))
            .catch_unwind()
            .await;

        if let Err(e) = driver.close().await {
            warn!("[search] Browser teardown failed: {:#}", e);
        } else {
            info!("[search] Browser session closed");
        }

        match outcome {
            Ok(result) => result,
            Err(panic) => Err(SearchError::Panicked(panic_message(panic.as_ref()))),
        }
    }

    async fn drive(
        &self,
        driver: &mut dyn BrowserDriver,
        budget: f64,
    ) -> Result<LoopOutcome, SearchError> {
        driver
            .navigate(&self.seed_url)
            .await
            .map_err(SearchError::Session)?;
        if let Ok(false) = driver.wait_for_load(self.timings.load_timeout).await {
            warn!("[search] Seed page {} still loading, continuing", self.seed_url);
        }

        let mut agent = AgentLoop::new(self.planner.as_ref())
            .max_turns(self.max_turns)
            .timings(self.timings.clone());
        if let Some(events) = &self.events {
            agent = agent.events(events.clone());
        }

        Ok(agent
            .run(driver, self.viewport, &goal_prompt(budget))
            .await?)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "agent loop panicked".to_string()
    }
}

use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::brain::Planner;
use crate::error::AgentError;
use crate::eyes;
use crate::hands::{self, BrowserDriver, ExecutorTimings};
use crate::types::{AgentEvent, MAX_TURNS_PER_SEARCH, Part, Turn, Viewport};

/// How a loop run ended, short of a fatal error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopOutcome {
    /// The planner replied without actions.
    Done { text: String },
    /// The turn budget ran out; carries the last text the planner produced.
    BudgetExhausted { partial_text: String },
}

impl LoopOutcome {
    pub fn text(&self) -> &str {
        match self {
            LoopOutcome::Done { text } => text,
            LoopOutcome::BudgetExhausted { partial_text } => partial_text,
        }
    }
}

/// Plan/execute loop between a planner and one browser session.
pub struct AgentLoop<'a> {
    planner: &'a dyn Planner,
    max_turns: usize,
    timings: ExecutorTimings,
    events: Option<broadcast::Sender<AgentEvent>>,
}

impl<'a> AgentLoop<'a> {
    pub fn new(planner: &'a dyn Planner) -> Self {
        Self {
            planner,
            max_turns: MAX_TURNS_PER_SEARCH,
            timings: ExecutorTimings::default(),
            events: None,
        }
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

    fn emit(&self, event: AgentEvent) {
        if let Some(tx) = &self.events {
            // No subscribers is fine.
            let _ = tx.send(event);
        }
    }

    /// Drive the session towards `goal` until the planner answers, the turn
    /// budget runs out, the planner keeps failing through the last turn, or
    /// it asks for a human confirmation.
    pub async fn run(
        &self,
        driver: &mut dyn BrowserDriver,
        viewport: Viewport,
        goal: &str,
    ) -> Result<LoopOutcome, AgentError> {
        let (screenshot, url) = eyes::capture(driver).await.map_err(AgentError::Observe)?;
        info!("[agent] Starting at {}", url);

        let mut conversation = vec![Turn::user(vec![
            Part::Text(goal.to_string()),
            Part::Image {
                mime_type: "image/png".to_string(),
                data: screenshot,
            },
        ])];
        let mut partial_text = String::new();
        let mut step_count = 0;

        for turn in 1..=self.max_turns {
            info!("[agent] Turn {}/{}: asking planner", turn, self.max_turns);
            self.emit(AgentEvent::Thinking { turn });

            let reply = match self.planner.plan(&conversation, viewport).await {
                Ok(reply) => reply,
                Err(e) if turn == self.max_turns => {
                    warn!("[agent] Planner error on final turn: {:#}", e);
                    self.emit(AgentEvent::TaskError {
                        message: format!("{:#}", e),
                    });
                    return Err(AgentError::Planner { turn, source: e });
                }
                Err(e) => {
                    warn!("[agent] Planner error on turn {}: {:#}", turn, e);
                    self.emit(AgentEvent::StepError {
                        message: format!("{:#}", e),
                    });
                    continue;
                }
            };

            let calls = reply.calls();
            let text = reply.text();
            conversation.push(reply);

            if calls.is_empty() {
                info!("[agent] Planner finished after {} turn(s)", turn);
                self.emit(AgentEvent::TaskComplete {
                    summary: text.clone(),
                });
                return Ok(LoopOutcome::Done { text });
            }
            if !text.is_empty() {
                partial_text = text;
            }

            // Nobody is around to confirm, and the API refuses to continue
            // without an acknowledgement.
            if let Some((action, explanation)) = calls
                .iter()
                .find_map(|c| c.confirmation_request().map(|e| (c.name.clone(), e)))
            {
                warn!("[agent] {} needs confirmation: {}", action, explanation);
                let err = AgentError::ConfirmationRequired {
                    action,
                    explanation,
                };
                self.emit(AgentEvent::TaskError {
                    message: err.to_string(),
                });
                return Err(err);
            }

            for call in &calls {
                step_count += 1;
                self.emit(AgentEvent::Step {
                    number: step_count,
                    description: format!("{} {}", call.name, call.args),
                });
            }

            let results = hands::execute_batch(driver, viewport, &calls, &self.timings).await;
            for message in results.iter().filter_map(|r| r.error_message()) {
                self.emit(AgentEvent::StepError {
                    message: message.to_string(),
                });
            }

            let observations = eyes::observe(driver, &calls, results).await;
            conversation.push(Turn::user(
                observations.into_iter().map(Part::Observation).collect(),
            ));
        }

        warn!("[agent] Turn budget ({}) exhausted", self.max_turns);
        self.emit(AgentEvent::TaskError {
            message: format!("Reached maximum turn limit ({})", self.max_turns),
        });
        Ok(LoopOutcome::BudgetExhausted { partial_text })
    }
}

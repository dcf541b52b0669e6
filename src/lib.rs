pub mod advisor;
pub mod agent;
pub mod brain;
pub mod config;
pub mod coords;
pub mod error;
pub mod eyes;
pub mod face;
pub mod hands;
pub mod payload;
pub mod search;
pub mod types;

#[cfg(test)]
mod test_http;

pub use agent::{AgentLoop, LoopOutcome};
pub use brain::Planner;
pub use error::{AdvisorError, AgentError, ProxyError, SearchError};
pub use hands::{BrowserDriver, BrowserLauncher, ExecutorTimings};
pub use search::CarSearch;
pub use types::{CarSearchResult, Viewport};

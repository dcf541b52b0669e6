use thiserror::Error;

/// Fatal outcomes of the plan/execute loop.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("could not observe the initial page: {0:#}")]
    Observe(#[source] anyhow::Error),

    #[error("planner asked for confirmation before {action}: {explanation}")]
    ConfirmationRequired { action: String, explanation: String },

    #[error("planner failed on turn {turn}: {source:#}")]
    Planner {
        turn: usize,
        #[source]
        source: anyhow::Error,
    },
}

/// Fatal outcomes of a whole car search, including session setup.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("missing prerequisite: {0:#}")]
    MissingPrerequisite(#[source] anyhow::Error),

    #[error("invalid budget: {0}")]
    InvalidBudget(f64),

    #[error("browser session failed: {0:#}")]
    Session(#[source] anyhow::Error),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error("search aborted: {0}")]
    Panicked(String),
}

/// Request-level failures of the advisor endpoints.
#[derive(Debug, Error)]
pub enum AdvisorError {
    #[error("Invalid session")]
    InvalidSession,

    #[error("No message provided")]
    NoMessage,

    #[error("No text provided")]
    NoText,

    #[error("Session not found")]
    SessionNotFound,

    #[error("Failed to generate speech")]
    Speech(#[source] anyhow::Error),
}

/// Failures of the banking pass-through and chat-completion routes.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Invalid {kind} payload: {details}")]
    InvalidPayload { kind: &'static str, details: String },

    #[error("Invalid account id: {0:?}")]
    InvalidAccountId(String),

    #[error("NESSIE_API_KEY is not configured")]
    NotConfigured,

    #[error("Upstream request failed ({status})")]
    Upstream {
        status: u16,
        details: serde_json::Value,
    },

    #[error("Upstream request failed: {0:#}")]
    Transport(#[source] anyhow::Error),

    #[error("Gemini request failed: {0:#}")]
    Chat(#[source] anyhow::Error),
}

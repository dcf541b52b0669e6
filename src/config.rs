use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::advisor::banking::{NESSIE_BASE_URL, NessieClient};
use crate::advisor::store::InMemorySessionStore;
use crate::advisor::voice::ElevenLabs;
use crate::advisor::{Advisor, GeminiText};
use crate::brain::{Brain, CHAT_MODEL, COMPUTER_USE_MODEL, GeminiClient};
use crate::face::{AppState, ConfiguredKeys};
use crate::hands::ChromeLauncher;
use crate::search::CarSearch;
use crate::types::{AgentEvent, MAX_TURNS_PER_SEARCH, SEED_URL};

#[derive(Parser, Debug)]
#[command(name = "moneytalks", version, about = "MoneyTalks advisor backend")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub config: Config,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run the HTTP API (default).
    Serve,
    /// Run one car search and print the result as JSON.
    Search {
        #[arg(long)]
        budget: f64,
    },
}

#[derive(Args, Debug, Clone)]
pub struct Config {
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub gemini_api_key: Option<String>,

    /// Model that plans browser actions.
    #[arg(long, env = "GEMINI_MODEL", default_value = COMPUTER_USE_MODEL)]
    pub gemini_model: String,

    /// Model used for advisor chat.
    #[arg(long, env = "GEMINI_CHAT_MODEL", default_value = CHAT_MODEL)]
    pub chat_model: String,

    #[arg(long, env = "ELEVENLABS_API_KEY", hide_env_values = true)]
    pub elevenlabs_api_key: Option<String>,

    #[arg(long, env = "NESSIE_API_KEY", hide_env_values = true)]
    pub nessie_api_key: Option<String>,

    #[arg(long, env = "NESSIE_BASE", default_value = NESSIE_BASE_URL)]
    pub nessie_base: String,

    #[arg(long, env = "PORT", default_value_t = 3001)]
    pub port: u16,

    #[arg(long, env = "CHROME_PATH")]
    pub chrome_path: Option<PathBuf>,

    /// Show the browser window while searching.
    #[arg(long)]
    pub headful: bool,

    #[arg(long, env = "MAX_TURNS", default_value_t = MAX_TURNS_PER_SEARCH)]
    pub max_turns: usize,

    /// Page the browser opens before the planner takes over.
    #[arg(long, env = "SEED_URL", default_value = SEED_URL)]
    pub seed_url: String,
}

impl Config {
    pub fn keys(&self) -> ConfiguredKeys {
        let set = |k: &Option<String>| k.as_deref().is_some_and(|k| !k.trim().is_empty());
        ConfiguredKeys {
            gemini: set(&self.gemini_api_key),
            elevenlabs: set(&self.elevenlabs_api_key),
            nessie: set(&self.nessie_api_key),
        }
    }

    fn gemini(&self) -> GeminiClient {
        GeminiClient::new(self.gemini_api_key.clone())
    }

    pub fn car_search(&self, events: Option<broadcast::Sender<AgentEvent>>) -> CarSearch {
        let planner = Arc::new(Brain::new(self.gemini(), self.gemini_model.clone()));
        let launcher = Arc::new(ChromeLauncher::new(!self.headful, self.chrome_path.clone()));
        let search = CarSearch::new(planner, launcher)
            .seed_url(self.seed_url.clone())
            .max_turns(self.max_turns);
        match events {
            Some(tx) => search.events(tx),
            None => search,
        }
    }

    fn nessie(&self) -> NessieClient {
        NessieClient::new(self.nessie_api_key.clone(), self.nessie_base.clone())
    }

    pub fn advisor(&self) -> Advisor {
        Advisor::new(
            Arc::new(GeminiText::new(self.gemini(), self.chat_model.clone())),
            self.nessie(),
            ElevenLabs::new(self.elevenlabs_api_key.clone()),
            Arc::new(InMemorySessionStore::new()),
        )
    }

    /// Wire every service the HTTP API needs.
    pub fn app_state(&self) -> AppState {
        let (event_tx, _) = broadcast::channel::<AgentEvent>(64);
        AppState {
            advisor: Arc::new(self.advisor()),
            nessie: self.nessie(),
            search: Arc::new(self.car_search(Some(event_tx.clone()))),
            event_tx,
            keys: self.keys(),
        }
    }
}

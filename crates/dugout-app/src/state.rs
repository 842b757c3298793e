// Application state shared by every HTTP handler.
//
// One mutex guards the whole state: each request runs its mutation and the
// persistence round-trip to completion before the next one starts. The chat
// stream is the only long-lived operation and it never holds the lock while
// waiting on the provider.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use dugout_baseball::configurations::ConfigurationBook;
use dugout_baseball::lineup::LineupEngine;
use dugout_baseball::player::Player;
use dugout_baseball::roster::Roster;
use dugout_baseball::schedule::{Game, Schedule, StatBook};
use dugout_baseball::DugoutError;
use dugout_core::config::Config;
use dugout_core::store::{DocumentStore, JsonFileStore};
use dugout_llm::prompt::LineupContext;
use dugout_llm::session::ChatSession;
use dugout_llm::settings::AiSettings;
use dugout_llm::AdvisoryClient;
use tokio::sync::Mutex;
use tracing::info;

pub type SharedState = Arc<Mutex<AppState>>;

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn DocumentStore>,
    pub roster: Roster,
    pub lineup: LineupEngine,
    pub configurations: ConfigurationBook,
    pub schedule: Schedule,
    pub stats: StatBook,
    pub ai_settings: AiSettings,
    pub advisor: AdvisoryClient,
    pub chat: ChatSession,
}

impl AppState {
    /// Load every collection from `store` and configure the advisor from the
    /// saved AI settings.
    pub fn new(config: Config, store: Arc<dyn DocumentStore>) -> Result<Self, DugoutError> {
        let roster = Roster::load(store.clone())?;
        let lineup = LineupEngine::load(store.clone())?;
        let configurations = ConfigurationBook::load(store.clone())?;
        let schedule = Schedule::load(store.clone())?;
        let stats = StatBook::load(store.clone())?;
        let ai_settings = AiSettings::load(store.as_ref(), &config)?;
        let advisor = AdvisoryClient::from_settings(
            &ai_settings,
            Duration::from_secs(config.ai.request_timeout_secs),
        );

        info!(
            players = roster.all().len(),
            games = schedule.list().len(),
            configurations = configurations.list().len(),
            "application state loaded"
        );

        Ok(Self {
            config,
            store,
            roster,
            lineup,
            configurations,
            schedule,
            stats,
            ai_settings,
            advisor,
            chat: ChatSession::new(),
        })
    }

    /// Open the JSON document store in the configured data directory.
    pub fn open(config: Config) -> anyhow::Result<Self> {
        let data_dir = config.storage.resolve_data_dir();
        let store = JsonFileStore::open(&data_dir)
            .with_context(|| format!("failed to open data directory {}", data_dir.display()))?;
        info!("Data directory: {}", data_dir.display());
        Self::new(config, Arc::new(store)).context("failed to load saved data")
    }

    pub fn into_shared(self) -> SharedState {
        Arc::new(Mutex::new(self))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.config.ai.request_timeout_secs)
    }

    /// Replace the AI settings and rebuild the advisor. Any pending chat turn
    /// belongs to the old provider and is cancelled.
    pub fn apply_ai_settings(&mut self, settings: AiSettings) -> Result<(), DugoutError> {
        settings.save(self.store.as_ref())?;
        self.advisor = AdvisoryClient::from_settings(&settings, self.connect_timeout());
        self.ai_settings = settings;
        self.chat.cancel();
        Ok(())
    }

    pub fn lineup_context(&self) -> LineupContext<'_> {
        LineupContext::new(&self.roster, &self.lineup)
    }

    /// Delete a player and every reference to them: lineup, field, bench,
    /// saved configurations and stat lines.
    pub fn delete_player(&mut self, id: &str) -> Result<Player, DugoutError> {
        self.roster.require(id)?;
        self.lineup.purge_player(id)?;
        self.configurations.purge_player(id)?;
        let lines = self.stats.remove_player(id)?;
        let removed = self.roster.remove(id)?;
        info!(player_id = %id, stat_lines = lines, "player deleted with references");
        Ok(removed)
    }

    /// Delete a game together with its stat lines.
    pub fn delete_game(&mut self, id: &str) -> Result<Game, DugoutError> {
        self.schedule.require(id)?;
        let lines = self.stats.remove_game(id)?;
        let removed = self.schedule.remove(id)?;
        info!(game_id = %id, stat_lines = lines, "game deleted");
        Ok(removed)
    }
}

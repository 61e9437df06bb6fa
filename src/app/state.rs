//! Application state shared across routes

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::game::{GameMatch, MatchCommand, MatchHandle, MatchRegistry};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub match_registry: Arc<MatchRegistry>,
    /// The match new connections are routed to
    current_match: Arc<RwLock<Option<MatchHandle>>>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            match_registry: Arc::new(MatchRegistry::new()),
            current_match: Arc::new(RwLock::new(None)),
        }
    }

    /// Handle to the live match, starting a fresh one if the previous match
    /// ended. One match runs at a time in this process.
    pub fn ensure_match(&self) -> MatchHandle {
        let mut current = self.current_match.write();
        if let Some(handle) = current.as_ref() {
            if !handle.is_closed() {
                return handle.clone();
            }
            self.match_registry.remove(&handle.id);
        }

        let id = Uuid::new_v4();
        let seed: u64 = rand::random();
        let (game_match, handle) = GameMatch::new(
            id,
            self.config.game_mode,
            seed,
            self.config.join_window,
        );
        tokio::spawn(game_match.run());
        self.match_registry.insert(handle.clone());
        *current = Some(handle.clone());

        info!(match_id = %id, mode = ?self.config.game_mode, "Match task spawned");
        handle
    }

    /// Best-effort stop of the live match, used on shutdown
    pub fn stop_matches(&self) {
        if let Some(handle) = self.current_match.read().as_ref() {
            let _ = handle.cmd_tx.try_send(MatchCommand::Stop);
        }
    }
}

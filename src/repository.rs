//! Game-keyed board store.
//!
//! The engines never touch storage directly: the session controller reads a
//! snapshot or runs a mutation through [`BoardRepository::update`], which
//! applies it to a private copy and swaps the copy in only on success. Readers
//! therefore see either the previous committed board or the next one.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::board::{Board, GameId};
use crate::error::{ChessError, Result};

pub trait BoardRepository: Send + Sync {
    fn insert(&self, board: Board) -> Result<GameId>;

    /// Clone of the last committed board.
    fn snapshot(&self, game_id: &GameId) -> Result<Board>;

    /// Applies `mutation` atomically: on `Err` nothing is committed.
    fn update(&self, game_id: &GameId, mutation: &mut dyn FnMut(&mut Board) -> Result<()>) -> Result<()>;

    fn game_ids(&self) -> Result<Vec<GameId>>;
}

/// Process-local store: one lock per game, plus a lock over the game table.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    games: RwLock<HashMap<GameId, Arc<RwLock<Board>>>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn game(&self, game_id: &GameId) -> Result<Arc<RwLock<Board>>> {
        let games = self.games.read().map_err(|_| ChessError::storage("game lookup", "game table lock poisoned"))?;
        games.get(game_id).cloned().ok_or_else(|| ChessError::GameNotFound(game_id.clone()))
    }
}

impl BoardRepository for InMemoryRepository {
    fn insert(&self, board: Board) -> Result<GameId> {
        let game_id = board.game_id().clone();
        let mut games = self.games.write().map_err(|_| ChessError::storage("insert", "game table lock poisoned"))?;
        games.insert(game_id.clone(), Arc::new(RwLock::new(board)));
        debug!(game_id = %game_id, "game stored");
        Ok(game_id)
    }

    fn snapshot(&self, game_id: &GameId) -> Result<Board> {
        let game = self.game(game_id)?;
        let board = game.read().map_err(|_| ChessError::storage("snapshot", "board lock poisoned"))?;
        Ok(board.clone())
    }

    fn update(&self, game_id: &GameId, mutation: &mut dyn FnMut(&mut Board) -> Result<()>) -> Result<()> {
        let game = self.game(game_id)?;
        // Write lock held across the whole mutation: one in-flight writer per game
        let mut committed = game.write().map_err(|_| ChessError::storage("update", "board lock poisoned"))?;
        let mut working = committed.clone();
        mutation(&mut working)?;
        *committed = working;
        debug!(game_id = %game_id, turn = committed.info.current_turn, "board committed");
        Ok(())
    }

    fn game_ids(&self) -> Result<Vec<GameId>> {
        let games = self.games.read().map_err(|_| ChessError::storage("list games", "game table lock poisoned"))?;
        let mut ids: Vec<GameId> = games.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

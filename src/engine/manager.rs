// Match lifecycle: the match arena, seat admission, activation, match end,
// and eviction of finished matches.
//
// Each match owns its own async mutex; operations on different matches
// never serialize against each other. The `matches` map lock only guards
// map lookups and is never held across an await.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::content::ContentService;
use crate::metrics;
use crate::question::{Difficulty, QuestionKind, QuestionService};

use super::events::ServerEvent;
use super::sessions::SessionRegistry;
use super::state::{Match, MatchStatus, Player, MATCH_READY_GRACE};

/// One match's shared cell: authoritative state behind its own lock, plus
/// the handle of the currently running round timer.
pub struct MatchCell {
    pub state: tokio::sync::Mutex<Match>,
    pub(crate) timer: Mutex<Option<JoinHandle<()>>>,
}

impl MatchCell {
    fn new(m: Match) -> Self {
        Self {
            state: tokio::sync::Mutex::new(m),
            timer: Mutex::new(None),
        }
    }

    /// Replace the stored round timer, aborting the previous one.
    pub(crate) fn replace_timer(&self, handle: JoinHandle<()>) {
        let mut slot = self.timer.lock().unwrap();
        if let Some(old) = slot.take() {
            old.abort();
        }
        *slot = Some(handle);
    }

    /// Abort and clear the stored round timer.
    pub(crate) fn cancel_timer(&self) {
        if let Some(handle) = self.timer.lock().unwrap().take() {
            handle.abort();
        }
    }

    /// Clear the timer slot without aborting. Used by the timeout path,
    /// which runs on the timer task itself.
    pub(crate) fn detach_timer(&self) {
        self.timer.lock().unwrap().take();
    }
}

/// The engine: match arena, session registry, and collaborator services.
pub struct MatchEngine {
    matches: Mutex<HashMap<String, Arc<MatchCell>>>,
    pub sessions: SessionRegistry,
    pub(crate) questions: Arc<dyn QuestionService>,
    pub(crate) content: Arc<dyn ContentService>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CreateMatchError {
    #[error("Course not found")]
    CourseNotFound,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JoinError {
    #[error("Match not found")]
    MatchNotFound,
    #[error("Match is full")]
    MatchFull,
    #[error("Player name already taken")]
    NameTaken,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConnectError {
    #[error("Match not found")]
    MatchNotFound,
    #[error("Player not in match")]
    PlayerNotInMatch,
}

/// REST-facing status snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct MatchStatusView {
    pub match_id: String,
    pub status: MatchStatus,
    pub players: HashMap<String, i32>,
    pub time_limit: u64,
    pub winner: Option<String>,
}

/// What the gateway needs to greet a (re)connecting player.
#[derive(Debug)]
pub struct ConnectSnapshot {
    pub players: Vec<String>,
    pub status: MatchStatus,
    pub healths: HashMap<String, i32>,
    /// Public round_start replay if a round is live.
    pub live_round: Option<ServerEvent>,
}

impl MatchEngine {
    pub fn new(
        questions: Arc<dyn QuestionService>,
        content: Arc<dyn ContentService>,
    ) -> Arc<Self> {
        Arc::new(Self {
            matches: Mutex::new(HashMap::new()),
            sessions: SessionRegistry::new(),
            questions,
            content,
        })
    }

    pub(crate) fn cell(&self, match_id: &str) -> Option<Arc<MatchCell>> {
        self.matches.lock().unwrap().get(match_id).cloned()
    }

    /// Create a match in waiting status with the creator seated.
    pub async fn create_match(
        &self,
        course_id: &str,
        player_name: &str,
        time_limit_secs: u64,
        question_types: Vec<QuestionKind>,
        difficulty: Difficulty,
    ) -> Result<String, CreateMatchError> {
        if !self.content.course_exists(course_id).await {
            return Err(CreateMatchError::CourseNotFound);
        }

        let match_id = Uuid::new_v4().to_string()[..8].to_string();
        let m = Match::new(
            &match_id,
            course_id,
            player_name,
            time_limit_secs,
            question_types,
            difficulty,
        );

        self.matches
            .lock()
            .unwrap()
            .insert(match_id.clone(), Arc::new(MatchCell::new(m)));
        self.sessions.register_match(&match_id);

        metrics::MATCHES_CREATED_TOTAL.inc();
        metrics::ACTIVE_MATCHES.inc();
        tracing::info!(%match_id, course_id, player_name, "match created");
        Ok(match_id)
    }

    /// Seat the second player.
    pub async fn join_match(
        &self,
        match_id: &str,
        player_name: &str,
    ) -> Result<(), JoinError> {
        let cell = self.cell(match_id).ok_or(JoinError::MatchNotFound)?;
        let mut m = cell.state.lock().await;
        if m.players.len() >= 2 {
            return Err(JoinError::MatchFull);
        }
        if m.player(player_name).is_some() {
            return Err(JoinError::NameTaken);
        }
        m.players.push(Player::new(player_name));
        tracing::info!(match_id, player_name, "player joined match");
        Ok(())
    }

    /// Status snapshot for REST polling.
    pub async fn match_status(&self, match_id: &str) -> Option<MatchStatusView> {
        let cell = self.cell(match_id)?;
        let m = cell.state.lock().await;
        Some(MatchStatusView {
            match_id: m.id.clone(),
            status: m.status,
            players: m.health_map(),
            time_limit: m.time_limit_secs,
            winner: m.winner.clone(),
        })
    }

    /// Validate a connecting channel and collect the replay snapshot.
    pub async fn connect_snapshot(
        &self,
        match_id: &str,
        player: &str,
    ) -> Result<ConnectSnapshot, ConnectError> {
        let cell = self.cell(match_id).ok_or(ConnectError::MatchNotFound)?;
        let m = cell.state.lock().await;
        if m.player(player).is_none() {
            return Err(ConnectError::PlayerNotInMatch);
        }
        Ok(ConnectSnapshot {
            players: m.player_names(),
            status: m.status,
            healths: m.health_map(),
            live_round: m
                .current_round
                .as_ref()
                .map(super::rounds::round_start_event),
        })
    }

    /// Called after a player's channel is registered. When both seats are
    /// connected on a waiting match, flips it to active — the flip happens
    /// under the match lock, so racing connects activate at most once —
    /// broadcasts match_ready, and schedules round 1 after a short grace.
    pub async fn player_connected(self: &Arc<Self>, match_id: &str) {
        let Some(cell) = self.cell(match_id) else {
            return;
        };

        let healths = {
            let mut m = cell.state.lock().await;
            if m.status != MatchStatus::Waiting
                || m.players.len() < 2
                || self.sessions.connected_count(match_id) < 2
            {
                return;
            }
            m.status = MatchStatus::Active;
            m.health_map()
        };

        tracing::info!(match_id, "both players connected, match active");
        self.sessions
            .broadcast(match_id, &ServerEvent::MatchReady { players: healths });

        let engine = self.clone();
        let match_id = match_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(MATCH_READY_GRACE).await;
            engine.start_round(&match_id).await;
        });
    }

    /// Finish the match: resolve the winner, cancel any timer, broadcast
    /// the final state. Idempotent.
    pub async fn end_match(self: &Arc<Self>, match_id: &str) {
        let Some(cell) = self.cell(match_id) else {
            return;
        };

        let (winner, final_hp) = {
            let mut m = cell.state.lock().await;
            if m.status == MatchStatus::Finished {
                return;
            }
            m.status = MatchStatus::Finished;
            m.current_round = None;
            m.finished_at = Some(Instant::now());
            let winner = m.decide_winner();
            m.winner = winner.clone();
            (winner, m.health_map())
        };

        cell.cancel_timer();

        tracing::info!(match_id, ?winner, "match finished");
        metrics::MATCHES_FINISHED_TOTAL.inc();
        metrics::ACTIVE_MATCHES.dec();

        self.sessions
            .broadcast(match_id, &ServerEvent::MatchEnd { winner, final_hp });
    }

    /// Background sweep dropping finished matches past the retention
    /// window, together with their connection tables. Finished matches
    /// have no timer left, so removal never races a live round.
    pub fn spawn_eviction_worker(self: &Arc<Self>, retention: Duration) {
        let engine = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(60)).await;

                let candidates: Vec<(String, Arc<MatchCell>)> = {
                    let matches = engine.matches.lock().unwrap();
                    matches
                        .iter()
                        .map(|(id, cell)| (id.clone(), cell.clone()))
                        .collect()
                };

                let now = Instant::now();
                for (id, cell) in candidates {
                    let expired = {
                        let m = cell.state.lock().await;
                        m.finished_at
                            .map(|t| now.duration_since(t) >= retention)
                            .unwrap_or(false)
                    };
                    if expired {
                        engine.matches.lock().unwrap().remove(&id);
                        engine.sessions.remove_match(&id);
                        tracing::debug!(match_id = %id, "evicted finished match");
                    }
                }
            }
        });
    }
}

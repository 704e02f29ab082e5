// Wire protocol: closed tagged unions for everything that crosses the
// duplex channel, in both directions.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::content::Citation;
use crate::question::QuestionKind;

/// Events pushed from the engine to connected clients.
/// Serialized as `{"type": "...", "data": {...}}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Sent to a player right after their channel is accepted.
    Connected {
        player: String,
        match_id: String,
        players: Vec<String>,
    },
    /// Both seats are connected; the match is live.
    MatchReady { players: HashMap<String, i32> },
    /// A round has started. Public question fields only.
    RoundStart {
        question_id: String,
        question_text: String,
        question_type: QuestionKind,
        #[serde(skip_serializing_if = "Option::is_none")]
        options: Option<Vec<String>>,
        time_limit: u64,
        citations: Vec<Citation>,
    },
    /// Once-per-second countdown while a round is live.
    RoundUpdate { seconds_left: u64 },
    /// Skip-vote tally changed.
    SkipUpdate {
        votes: usize,
        needed: usize,
        voters: Vec<String>,
    },
    /// A round resolved: win, timeout, or unanimous skip.
    RoundResult {
        timeout: bool,
        skipped: bool,
        winner_player: Option<String>,
        loser_player: Option<String>,
        damage: i32,
        #[serde(skip_serializing_if = "Option::is_none")]
        time_taken: Option<f64>,
        solution: String,
        correct_answer: String,
        citation: Vec<Citation>,
        players: HashMap<String, i32>,
    },
    /// The match is over.
    MatchEnd {
        winner: Option<String>,
        final_hp: HashMap<String, i32>,
    },
    /// Private grading feedback for an incorrect submission.
    AnswerFeedback {
        correct: bool,
        explanation: String,
        cooldown_seconds: u64,
    },
    Error { message: String },
    Pong,
}

/// Frames a client may send over the duplex channel.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientFrame {
    SubmitAnswer { question_id: String, answer: String },
    SkipRound,
    Ping,
}

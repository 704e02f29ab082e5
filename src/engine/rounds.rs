// Round controller: drives one question-answer cycle per round.
//
// Every mutation happens under the owning match's lock. The two-phase
// operations (round start, answer grading) release the lock across the
// collaborator call and re-validate the round on re-entry, so a round that
// resolved in the meantime rejects the late commit as stale instead of
// processing it twice.

use std::sync::Arc;

use rand::seq::SliceRandom;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

use crate::content::Citation;
use crate::metrics;

use super::events::ServerEvent;
use super::manager::MatchEngine;
use super::state::{
    damage_for, MatchStatus, Round, SubmissionRecord, COOLDOWN,
    MAX_GRADING_FRAGMENTS, MAX_QUESTION_FRAGMENTS, ROUND_BREAK, TIMEOUT_PENALTY,
};
use super::timer;

/// Typed rejection for a submission or skip vote. Admission errors carry
/// no side effects.
#[derive(Debug, Error, PartialEq)]
pub enum SubmitError {
    #[error("Match not found")]
    NoMatch,
    #[error("Player not in match")]
    PlayerNotInMatch,
    #[error("No active round")]
    NoActiveRound,
    #[error("Invalid question ID")]
    StaleQuestion,
    #[error("Already submitted this round")]
    AlreadySubmitted,
    #[error("In cooldown")]
    InCooldown,
    #[error("Answer grading failed: {0}")]
    Grading(String),
}

/// Grading outcome returned to the submitting caller.
#[derive(Debug, Clone, Serialize)]
pub struct AnswerOutcome {
    pub correct: bool,
    pub damage_dealt: i32,
    pub your_hp: i32,
    pub opponent_hp: i32,
    pub explanation: String,
    pub citation: Vec<Citation>,
}

/// The public round_start frame: question text, type, options, limit and
/// citations. The correct answer and solution are withheld.
pub(crate) fn round_start_event(round: &Round) -> ServerEvent {
    ServerEvent::RoundStart {
        question_id: round.question_id.clone(),
        question_text: round.question.text.clone(),
        question_type: round.question.kind,
        options: round.question.options.clone(),
        time_limit: round.time_limit_secs,
        citations: round.question.citations.clone(),
    }
}

impl MatchEngine {
    /// Start the next round: generate a question from a bounded fragment
    /// sample, store the round, start the countdown, broadcast round_start.
    ///
    /// On generation failure the round stays absent and an error event is
    /// broadcast; the stall is visible and nothing retries automatically.
    pub async fn start_round(self: &Arc<Self>, match_id: &str) {
        let Some(cell) = self.cell(match_id) else {
            return;
        };

        let (course_id, kinds, difficulty, time_limit) = {
            let m = cell.state.lock().await;
            if m.status != MatchStatus::Active || m.current_round.is_some() {
                return;
            }
            (
                m.course_id.clone(),
                m.question_types.clone(),
                m.difficulty,
                m.time_limit_secs,
            )
        };

        // Suspension point: no lock held across the collaborator calls.
        let mut fragments = self.content.fragments(&course_id).await;
        if fragments.len() > MAX_QUESTION_FRAGMENTS {
            let mut rng = rand::thread_rng();
            fragments.shuffle(&mut rng);
            fragments.truncate(MAX_QUESTION_FRAGMENTS);
        }

        let mut question = match self
            .questions
            .generate(&fragments, &kinds, difficulty)
            .await
        {
            Ok(q) => q,
            Err(e) => {
                metrics::QUESTION_FAILURES_TOTAL.inc();
                tracing::warn!(match_id, error = %e, "question generation failed, round not started");
                self.sessions.broadcast(
                    match_id,
                    &ServerEvent::Error {
                        message: "Failed to generate question".to_string(),
                    },
                );
                return;
            }
        };
        question.time_limit_secs = time_limit;

        let (event, question_id) = {
            let mut m = cell.state.lock().await;
            // The match may have ended, or a racing start may have won.
            if m.status != MatchStatus::Active || m.current_round.is_some() {
                return;
            }
            for p in &mut m.players {
                p.submitted_this_round = false;
            }
            let round = Round::new(question, time_limit);
            let event = round_start_event(&round);
            let question_id = round.question_id.clone();
            m.current_round = Some(round);
            (event, question_id)
        };

        metrics::ROUNDS_STARTED_TOTAL.inc();
        tracing::debug!(match_id, %question_id, "round started");
        self.sessions.broadcast(match_id, &event);

        let handle = timer::spawn_round_timer(
            self.clone(),
            match_id.to_string(),
            question_id,
        );
        cell.replace_timer(handle);
    }

    /// Grade a submission. Admission invariants are checked atomically;
    /// grading runs without the lock; the commit re-validates that the
    /// round is still the one the answer was for.
    pub async fn submit_answer(
        self: &Arc<Self>,
        match_id: &str,
        player: &str,
        question_id: &str,
        answer: &str,
    ) -> Result<AnswerOutcome, SubmitError> {
        let cell = self.cell(match_id).ok_or(SubmitError::NoMatch)?;

        let (question, elapsed, course_id) = {
            let m = cell.state.lock().await;
            let p = m.player(player).ok_or(SubmitError::PlayerNotInMatch)?;
            let round = m.current_round.as_ref().ok_or(SubmitError::NoActiveRound)?;
            if round.question_id != question_id {
                return Err(SubmitError::StaleQuestion);
            }
            if p.submitted_this_round {
                return Err(SubmitError::AlreadySubmitted);
            }
            if p.in_cooldown(Instant::now()) {
                return Err(SubmitError::InCooldown);
            }
            (
                round.question.clone(),
                round.elapsed_secs(),
                m.course_id.clone(),
            )
        };

        // Suspension point: grade against a bounded fragment context.
        let mut fragments = self.content.fragments(&course_id).await;
        fragments.truncate(MAX_GRADING_FRAGMENTS);
        let outcome = self
            .questions
            .grade(&fragments, &question, answer)
            .await
            .map_err(|e| SubmitError::Grading(e.to_string()))?;

        metrics::ANSWERS_GRADED_TOTAL
            .with_label_values(&[if outcome.correct { "correct" } else { "incorrect" }])
            .inc();

        if outcome.correct {
            self.commit_win(&cell, match_id, player, question_id, elapsed, outcome)
                .await
        } else {
            self.commit_incorrect(&cell, match_id, player, question_id, elapsed, outcome)
                .await
        }
    }

    /// The sole winning path for a round. Exactly one call can pass the
    /// re-validation: the first one closes the round, everything later is
    /// stale.
    async fn commit_win(
        self: &Arc<Self>,
        cell: &super::manager::MatchCell,
        match_id: &str,
        player: &str,
        question_id: &str,
        elapsed: f64,
        outcome: crate::question::GradeOutcome,
    ) -> Result<AnswerOutcome, SubmitError> {
        let mut m = cell.state.lock().await;

        let round_current = matches!(&m.current_round, Some(r) if r.question_id == question_id);
        if !round_current {
            return Err(SubmitError::StaleQuestion);
        }
        if m.player(player)
            .ok_or(SubmitError::PlayerNotInMatch)?
            .submitted_this_round
        {
            return Err(SubmitError::AlreadySubmitted);
        }
        let opponent = m.opponent_name(player).ok_or(SubmitError::PlayerNotInMatch)?;

        let (damage, solution, correct_answer, citations) = {
            let Some(round) = m.current_round.as_mut() else {
                return Err(SubmitError::StaleQuestion);
            };
            let damage = damage_for(round.time_limit_secs, elapsed);
            round.answers.insert(
                player.to_string(),
                SubmissionRecord {
                    correct: true,
                    elapsed_secs: elapsed,
                    damage,
                },
            );
            (
                damage,
                round.question.solution.clone(),
                round.question.correct_answer.clone(),
                round.question.citations.clone(),
            )
        };

        if let Some(p) = m.player_mut(player) {
            p.submitted_this_round = true;
        }
        if let Some(o) = m.player_mut(&opponent) {
            o.apply_damage(damage);
        }

        let your_hp = m.player(player).map(|p| p.hp).unwrap_or(0);
        let opponent_hp = m.player(&opponent).map(|p| p.hp).unwrap_or(0);
        let healths = m.health_map();
        let any_zero = m.players.iter().any(|p| p.hp <= 0);
        m.current_round = None;
        drop(m);

        cell.cancel_timer();
        metrics::ROUNDS_RESOLVED_TOTAL.with_label_values(&["win"]).inc();
        metrics::WINNING_ANSWER_SECONDS.observe(elapsed);
        tracing::info!(match_id, player, damage, "round won");

        self.sessions.broadcast(
            match_id,
            &ServerEvent::RoundResult {
                timeout: false,
                skipped: false,
                winner_player: Some(player.to_string()),
                loser_player: Some(opponent),
                damage,
                time_taken: Some((elapsed * 100.0).round() / 100.0),
                solution,
                correct_answer,
                citation: citations,
                players: healths,
            },
        );

        if any_zero {
            self.end_match(match_id).await;
        } else {
            self.schedule_next_round(match_id);
        }

        Ok(AnswerOutcome {
            correct: true,
            damage_dealt: damage,
            your_hp,
            opponent_hp,
            explanation: outcome.explanation,
            citation: outcome.citations,
        })
    }

    /// An incorrect answer: private feedback plus a cooldown. The round
    /// stays open for the opponent and for this player after the cooldown.
    async fn commit_incorrect(
        self: &Arc<Self>,
        cell: &super::manager::MatchCell,
        match_id: &str,
        player: &str,
        question_id: &str,
        elapsed: f64,
        outcome: crate::question::GradeOutcome,
    ) -> Result<AnswerOutcome, SubmitError> {
        let mut m = cell.state.lock().await;

        {
            let p = m.player_mut(player).ok_or(SubmitError::PlayerNotInMatch)?;
            p.cooldown_until = Some(Instant::now() + COOLDOWN);
        }
        if let Some(round) = m.current_round.as_mut() {
            if round.question_id == question_id {
                round.answers.insert(
                    player.to_string(),
                    SubmissionRecord {
                        correct: false,
                        elapsed_secs: elapsed,
                        damage: 0,
                    },
                );
            }
        }
        let your_hp = m.player(player).map(|p| p.hp).unwrap_or(0);
        let opponent_hp = m
            .opponent_name(player)
            .and_then(|o| m.player(&o).map(|p| p.hp))
            .unwrap_or(0);
        drop(m);

        self.sessions.send_to(
            match_id,
            player,
            ServerEvent::AnswerFeedback {
                correct: false,
                explanation: outcome.explanation.clone(),
                cooldown_seconds: COOLDOWN.as_secs(),
            },
        );

        Ok(AnswerOutcome {
            correct: false,
            damage_dealt: 0,
            your_hp,
            opponent_hp,
            explanation: outcome.explanation,
            citation: outcome.citations,
        })
    }

    /// Record a skip vote. Unanimity cancels the round without damage;
    /// the solution is still revealed and the next round always follows.
    pub async fn vote_skip(
        self: &Arc<Self>,
        match_id: &str,
        player: &str,
    ) -> Result<(), SubmitError> {
        let cell = self.cell(match_id).ok_or(SubmitError::NoMatch)?;
        let mut m = cell.state.lock().await;

        if m.player(player).is_none() {
            return Err(SubmitError::PlayerNotInMatch);
        }
        let needed = m.players.len();

        let (votes, voters, unanimous) = {
            let Some(round) = m.current_round.as_mut() else {
                return Err(SubmitError::NoActiveRound);
            };
            if !round.skip_votes.insert(player.to_string()) {
                // Duplicate vote, ignored.
                return Ok(());
            }
            let votes = round.skip_votes.len();
            let mut voters: Vec<String> = round.skip_votes.iter().cloned().collect();
            voters.sort();
            (votes, voters, votes >= needed)
        };

        if !unanimous {
            drop(m);
            self.sessions.broadcast(
                match_id,
                &ServerEvent::SkipUpdate {
                    votes,
                    needed,
                    voters,
                },
            );
            return Ok(());
        }

        let (solution, correct_answer, citations) = {
            let Some(round) = m.current_round.as_ref() else {
                return Err(SubmitError::NoActiveRound);
            };
            (
                round.question.solution.clone(),
                round.question.correct_answer.clone(),
                round.question.citations.clone(),
            )
        };
        m.current_round = None;
        let healths = m.health_map();
        drop(m);

        cell.cancel_timer();
        metrics::ROUNDS_RESOLVED_TOTAL.with_label_values(&["skip"]).inc();
        tracing::debug!(match_id, "round skipped unanimously");

        self.sessions.broadcast(
            match_id,
            &ServerEvent::SkipUpdate {
                votes,
                needed,
                voters,
            },
        );
        self.sessions.broadcast(
            match_id,
            &ServerEvent::RoundResult {
                timeout: false,
                skipped: true,
                winner_player: None,
                loser_player: None,
                damage: 0,
                time_taken: None,
                solution,
                correct_answer,
                citation: citations,
                players: healths,
            },
        );

        // Skip cannot reduce health, so the match always continues.
        self.schedule_next_round(match_id);
        Ok(())
    }

    /// Timeout resolution: a fixed penalty for everyone without a correct
    /// submission this round, no winner. Invoked by the round's timer task;
    /// a stale fire for a resolved round is a no-op.
    pub(crate) async fn handle_round_timeout(
        self: &Arc<Self>,
        match_id: &str,
        question_id: &str,
    ) {
        let Some(cell) = self.cell(match_id) else {
            return;
        };

        let (solution, correct_answer, citations, healths, any_zero) = {
            let mut m = cell.state.lock().await;
            let round_current = matches!(&m.current_round, Some(r) if r.question_id == question_id);
            if !round_current {
                return;
            }
            let (solution, correct_answer, citations) = {
                let Some(round) = m.current_round.as_ref() else {
                    return;
                };
                (
                    round.question.solution.clone(),
                    round.question.correct_answer.clone(),
                    round.question.citations.clone(),
                )
            };
            for p in &mut m.players {
                if !p.submitted_this_round {
                    p.apply_damage(TIMEOUT_PENALTY);
                }
            }
            let healths = m.health_map();
            let any_zero = m.players.iter().any(|p| p.hp <= 0);
            m.current_round = None;
            (solution, correct_answer, citations, healths, any_zero)
        };

        // This runs on the timer task itself: detach the handle, never abort.
        cell.detach_timer();
        metrics::ROUNDS_RESOLVED_TOTAL.with_label_values(&["timeout"]).inc();
        tracing::debug!(match_id, "round timed out");

        self.sessions.broadcast(
            match_id,
            &ServerEvent::RoundResult {
                timeout: true,
                skipped: false,
                winner_player: None,
                loser_player: None,
                damage: TIMEOUT_PENALTY,
                time_taken: None,
                solution,
                correct_answer,
                citation: citations,
                players: healths,
            },
        );

        if any_zero {
            self.end_match(match_id).await;
        } else {
            self.schedule_next_round(match_id);
        }
    }

    /// Start the next round after a short pause so clients can render the
    /// result. The start itself re-checks match status, so a match that
    /// ended in the meantime stays ended.
    fn schedule_next_round(self: &Arc<Self>, match_id: &str) {
        let engine = self.clone();
        let match_id = match_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(ROUND_BREAK).await;
            engine.start_round(&match_id).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::question::{Question, QuestionKind};

    #[test]
    fn test_round_start_event_withholds_answer() {
        let question = Question {
            question_id: "q1".into(),
            text: "What is 2+2?".into(),
            kind: QuestionKind::Calc,
            options: None,
            correct_answer: "4".into(),
            solution: "add them".into(),
            citations: vec![],
            time_limit_secs: 30,
        };
        let round = Round::new(question, 30);
        let json = serde_json::to_string(&round_start_event(&round)).unwrap();
        assert!(json.contains("\"question_id\":\"q1\""));
        assert!(json.contains("\"time_limit\":30"));
        assert!(!json.contains("correct_answer"));
        assert!(!json.contains("solution"));
    }
}

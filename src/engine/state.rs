// Authoritative in-memory match state: players, health, rounds, and the
// damage model. Mutated only under the owning match's lock.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tokio::time::Instant;

use crate::question::{Difficulty, Question, QuestionKind};

pub const HP_MAX: i32 = 100;
pub const BASE_DAMAGE: i32 = 20;
pub const MAX_BONUS: i32 = 30;
pub const TIMEOUT_PENALTY: i32 = 8;

pub const COOLDOWN: std::time::Duration = std::time::Duration::from_secs(2);
/// Delay between the match_ready broadcast and round 1, so both clients
/// render the ready state first.
pub const MATCH_READY_GRACE: std::time::Duration = std::time::Duration::from_secs(2);
/// Delay between a round resolution and the next round start.
pub const ROUND_BREAK: std::time::Duration = std::time::Duration::from_secs(3);

/// Fragment sample cap for question generation, bounding prompt size.
pub const MAX_QUESTION_FRAGMENTS: usize = 10;
/// Fragment cap for grading context.
pub const MAX_GRADING_FRAGMENTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    Waiting,
    Active,
    Finished,
}

/// One seated player. Never exists outside a Match.
#[derive(Debug, Clone)]
pub struct Player {
    pub name: String,
    pub hp: i32,
    /// Set after an incorrect submission; submissions are rejected until it passes.
    pub cooldown_until: Option<Instant>,
    pub submitted_this_round: bool,
}

impl Player {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            hp: HP_MAX,
            cooldown_until: None,
            submitted_this_round: false,
        }
    }

    pub fn in_cooldown(&self, now: Instant) -> bool {
        self.cooldown_until.map(|until| now < until).unwrap_or(false)
    }

    /// Apply damage with a floor of 0.
    pub fn apply_damage(&mut self, amount: i32) {
        self.hp = (self.hp - amount).max(0);
    }
}

/// Audit record of one submission within a round. History only, never
/// consulted for control flow.
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionRecord {
    pub correct: bool,
    pub elapsed_secs: f64,
    pub damage: i32,
}

/// The in-progress round. Exists only while the match is active; replaced
/// with `None` on every resolution path.
#[derive(Debug, Clone)]
pub struct Round {
    pub question_id: String,
    pub question: Question,
    pub started_at: Instant,
    pub time_limit_secs: u64,
    pub skip_votes: HashSet<String>,
    pub answers: HashMap<String, SubmissionRecord>,
}

impl Round {
    pub fn new(question: Question, time_limit_secs: u64) -> Self {
        Self {
            question_id: question.question_id.clone(),
            question,
            started_at: Instant::now(),
            time_limit_secs,
            skip_votes: HashSet::new(),
            answers: HashMap::new(),
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }

    pub fn seconds_left(&self) -> u64 {
        let left = self.time_limit_secs as f64 - self.elapsed_secs();
        left.max(0.0) as u64
    }
}

/// The authoritative record for one match.
#[derive(Debug)]
pub struct Match {
    pub id: String,
    pub course_id: String,
    /// Seated players in join order; exactly 2 once active.
    pub players: Vec<Player>,
    pub time_limit_secs: u64,
    pub question_types: Vec<QuestionKind>,
    pub difficulty: Difficulty,
    pub status: MatchStatus,
    pub winner: Option<String>,
    pub current_round: Option<Round>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// Set when the match finishes; drives the eviction sweep.
    pub finished_at: Option<Instant>,
}

impl Match {
    pub fn new(
        id: &str,
        course_id: &str,
        creator: &str,
        time_limit_secs: u64,
        question_types: Vec<QuestionKind>,
        difficulty: Difficulty,
    ) -> Self {
        Self {
            id: id.to_string(),
            course_id: course_id.to_string(),
            players: vec![Player::new(creator)],
            time_limit_secs,
            question_types,
            difficulty,
            status: MatchStatus::Waiting,
            winner: None,
            current_round: None,
            created_at: chrono::Utc::now(),
            finished_at: None,
        }
    }

    pub fn player(&self, name: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.name == name)
    }

    pub fn player_mut(&mut self, name: &str) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.name == name)
    }

    pub fn opponent_name(&self, name: &str) -> Option<String> {
        self.players
            .iter()
            .find(|p| p.name != name)
            .map(|p| p.name.clone())
    }

    pub fn player_names(&self) -> Vec<String> {
        self.players.iter().map(|p| p.name.clone()).collect()
    }

    /// Current health by player name, the shape every broadcast carries.
    pub fn health_map(&self) -> HashMap<String, i32> {
        self.players.iter().map(|p| (p.name.clone(), p.hp)).collect()
    }

    /// Winner resolution: the single player above 0 health if exactly one
    /// qualifies, otherwise the strictly-highest health. A full tie has no
    /// winner.
    pub fn decide_winner(&self) -> Option<String> {
        let alive: Vec<&Player> = self.players.iter().filter(|p| p.hp > 0).collect();
        if alive.len() == 1 {
            return Some(alive[0].name.clone());
        }
        let max_hp = self.players.iter().map(|p| p.hp).max()?;
        let top: Vec<&Player> =
            self.players.iter().filter(|p| p.hp == max_hp).collect();
        if top.len() == 1 {
            Some(top[0].name.clone())
        } else {
            None
        }
    }
}

/// Damage dealt by a correct answer after `elapsed` seconds of a
/// `time_limit`-second round. Faster answers earn a larger bonus; answers
/// at or past the limit deal the base damage.
pub fn damage_for(time_limit_secs: u64, elapsed_secs: f64) -> i32 {
    let limit = time_limit_secs as f64;
    let speed_ratio = ((limit - elapsed_secs) / limit).max(0.0);
    BASE_DAMAGE + (MAX_BONUS as f64 * speed_ratio).round() as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::question::{Difficulty, QuestionKind};

    fn test_match() -> Match {
        let mut m = Match::new(
            "m1",
            "c1",
            "alice",
            30,
            vec![QuestionKind::Short],
            Difficulty::Medium,
        );
        m.players.push(Player::new("bob"));
        m
    }

    #[test]
    fn test_damage_fast_answer() {
        // 6 seconds into a 30 second round: bonus = round(30 * 24/30) = 24
        assert_eq!(damage_for(30, 6.0), 44);
    }

    #[test]
    fn test_damage_at_limit_is_base() {
        assert_eq!(damage_for(30, 30.0), BASE_DAMAGE);
        assert_eq!(damage_for(30, 45.0), BASE_DAMAGE);
    }

    #[test]
    fn test_damage_instant_answer_is_max() {
        assert_eq!(damage_for(30, 0.0), BASE_DAMAGE + MAX_BONUS);
    }

    #[test]
    fn test_damage_monotonically_non_increasing() {
        let mut prev = i32::MAX;
        for tenths in 0..=400 {
            let elapsed = tenths as f64 / 10.0;
            let d = damage_for(30, elapsed);
            assert!(d <= prev, "damage increased at elapsed={elapsed}");
            assert!(d >= BASE_DAMAGE && d <= BASE_DAMAGE + MAX_BONUS);
            prev = d;
        }
    }

    #[test]
    fn test_health_floors_at_zero() {
        let mut p = Player::new("alice");
        p.apply_damage(44);
        assert_eq!(p.hp, 56);
        p.apply_damage(200);
        assert_eq!(p.hp, 0);
        p.apply_damage(10);
        assert_eq!(p.hp, 0);
    }

    #[test]
    fn test_health_stays_in_range_under_any_sequence() {
        let mut p = Player::new("alice");
        for d in [0, 8, 44, 50, 20, 8, 999] {
            p.apply_damage(d);
            assert!(p.hp >= 0 && p.hp <= HP_MAX);
        }
    }

    #[test]
    fn test_winner_single_survivor() {
        let mut m = test_match();
        m.player_mut("bob").unwrap().hp = 0;
        assert_eq!(m.decide_winner(), Some("alice".to_string()));
    }

    #[test]
    fn test_winner_higher_health_when_both_alive() {
        let mut m = test_match();
        m.player_mut("bob").unwrap().hp = 40;
        assert_eq!(m.decide_winner(), Some("alice".to_string()));
    }

    #[test]
    fn test_winner_double_zero_tie_is_none() {
        let mut m = test_match();
        m.player_mut("alice").unwrap().hp = 0;
        m.player_mut("bob").unwrap().hp = 0;
        assert_eq!(m.decide_winner(), None);
    }

    #[test]
    fn test_winner_equal_health_tie_is_none() {
        let m = test_match();
        assert_eq!(m.decide_winner(), None);
    }

    #[test]
    fn test_cooldown_expires() {
        let mut p = Player::new("alice");
        let now = Instant::now();
        p.cooldown_until = Some(now + COOLDOWN);
        assert!(p.in_cooldown(now));
        assert!(!p.in_cooldown(now + COOLDOWN));
    }

    #[test]
    fn test_opponent_lookup() {
        let m = test_match();
        assert_eq!(m.opponent_name("alice"), Some("bob".to_string()));
        assert_eq!(m.opponent_name("bob"), Some("alice".to_string()));
    }
}

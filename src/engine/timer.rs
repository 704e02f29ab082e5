// Per-round countdown task: one-second ticks, a terminal timeout, and
// nothing after that.
//
// The task is bound to the question id it was started for and re-checks it
// on every tick, so a timer outliving its round degrades to a no-op. The
// handle is stored on the match cell; round replacement and match end abort
// it there (cancel-on-replace).

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::events::ServerEvent;
use super::manager::MatchEngine;

/// Spawn the countdown for the round identified by `question_id`.
pub fn spawn_round_timer(
    engine: Arc<MatchEngine>,
    match_id: String,
    question_id: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(1)).await;

            let Some(cell) = engine.cell(&match_id) else {
                return;
            };

            let seconds_left = {
                let state = cell.state.lock().await;
                match &state.current_round {
                    // Stale fire: the round this timer was created for is
                    // gone or replaced.
                    Some(round) if round.question_id == question_id => {
                        round.seconds_left()
                    }
                    _ => return,
                }
            };

            engine
                .sessions
                .broadcast(&match_id, &ServerEvent::RoundUpdate { seconds_left });

            if seconds_left == 0 {
                engine.handle_round_timeout(&match_id, &question_id).await;
                return;
            }
        }
    })
}

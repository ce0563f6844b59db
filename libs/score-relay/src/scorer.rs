use rand::Rng;

use crate::message::{Score, TelemetryMessage};

/// Computes a score for a received telemetry message.
///
/// The relay only depends on this trait; the actual scoring algorithm is
/// plugged in by the caller.
pub trait Scorer: Send + Sync {
    fn score(&self, message: &TelemetryMessage) -> Score;
}

/// Placeholder scorer: uniform random score in `[Score::MIN, Score::MAX]`,
/// ignoring the message content.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomScorer;

impl Scorer for RandomScorer {
    fn score(&self, _message: &TelemetryMessage) -> Score {
        let value = rand::thread_rng().gen_range(Score::MIN..=Score::MAX);
        Score::saturating(value)
    }
}

impl<F> Scorer for F
where
    F: Fn(&TelemetryMessage) -> Score + Send + Sync,
{
    fn score(&self, message: &TelemetryMessage) -> Score {
        self(message)
    }
}

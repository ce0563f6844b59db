use bytes::Bytes;
use serde::Serialize;

use crate::error::RelayError;

/// Topic with vehicle telemetry published by the vehicle abstraction module.
pub const TELEMETRY_TOPIC: &str = "vehicleabstractionmodule/public/telemetry";

/// Topic the monitor publishes score updates to.
pub const SCORE_TOPIC: &str = "samplemonitormodule/public/scoreupdate";

// ═══════════════════════════════════════════════════════════════
//  TelemetryMessage
// ═══════════════════════════════════════════════════════════════

/// Входящее сообщение телеметрии. Payload не разбирается и не валидируется.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryMessage {
    pub topic: String,
    pub payload: Bytes,
}

impl TelemetryMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Payload как текст, только для логов.
    pub fn payload_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

// ═══════════════════════════════════════════════════════════════
//  Score / ScoreMessage
// ═══════════════════════════════════════════════════════════════

/// Score in the closed range `[Score::MIN, Score::MAX]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Score(u8);

impl Score {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 100;

    pub fn new(value: u8) -> Option<Self> {
        (Self::MIN..=Self::MAX).contains(&value).then_some(Self(value))
    }

    /// Clamps `value` into the valid range.
    pub const fn saturating(value: u8) -> Self {
        if value < Self::MIN {
            Self(Self::MIN)
        } else if value > Self::MAX {
            Self(Self::MAX)
        } else {
            Self(value)
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScoreMessage {
    pub score: Score,
}

impl ScoreMessage {
    pub fn new(score: Score) -> Self {
        Self { score }
    }

    /// `{"score":<int>}`
    pub fn to_json(&self) -> Result<Vec<u8>, RelayError> {
        Ok(serde_json::to_vec(self)?)
    }
}

// ═══════════════════════════════════════════════════════════════
//  Topic filter matching
// ═══════════════════════════════════════════════════════════════

/// MQTT topic filter match: `+` matches one level, a trailing `#` matches
/// the rest (including the parent level itself).
pub fn topic_matches(topic: &str, filter: &str) -> bool {
    // $SYS и прочие служебные topic'и не матчатся wildcard'ом первого уровня
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut topic_levels = topic.split('/');
    let mut filter_levels = filter.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return filter_levels.next().is_none(),
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_bounds() {
        assert!(Score::new(0).is_none());
        assert_eq!(Score::new(1).map(Score::get), Some(1));
        assert_eq!(Score::new(100).map(Score::get), Some(100));
        assert!(Score::new(101).is_none());
        assert_eq!(Score::saturating(0).get(), 1);
        assert_eq!(Score::saturating(250).get(), 100);
    }

    #[test]
    fn score_message_is_single_integer_key() {
        let msg = ScoreMessage::new(Score::new(42).unwrap());
        let json = msg.to_json().unwrap();
        assert_eq!(json, br#"{"score":42}"#);

        let value: serde_json::Value = serde_json::from_slice(&json).unwrap();
        let obj = value.as_object().unwrap();
        assert_eq!(obj.len(), 1);
        assert!(obj["score"].is_u64());
    }

    #[test]
    fn payload_is_kept_verbatim() {
        let msg = TelemetryMessage::new(TELEMETRY_TOPIC, &b"\xffspeed=60"[..]);
        assert_eq!(&msg.payload[..], b"\xffspeed=60");
        assert_eq!(msg.payload_lossy(), "\u{fffd}speed=60");
    }

    #[test]
    fn exact_topic_match() {
        assert!(topic_matches(TELEMETRY_TOPIC, TELEMETRY_TOPIC));
        assert!(!topic_matches(SCORE_TOPIC, TELEMETRY_TOPIC));
        assert!(!topic_matches("vehicleabstractionmodule/public", TELEMETRY_TOPIC));
    }

    #[test]
    fn wildcard_match() {
        assert!(topic_matches(TELEMETRY_TOPIC, "vehicleabstractionmodule/+/telemetry"));
        assert!(topic_matches(TELEMETRY_TOPIC, "vehicleabstractionmodule/#"));
        assert!(topic_matches("vehicleabstractionmodule", "vehicleabstractionmodule/#"));
        assert!(topic_matches(TELEMETRY_TOPIC, "#"));
        assert!(!topic_matches(TELEMETRY_TOPIC, "+/public"));
        assert!(!topic_matches("$SYS/broker/uptime", "#"));
    }
}

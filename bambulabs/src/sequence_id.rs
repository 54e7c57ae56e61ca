//! The sequence id type.

use std::sync::atomic::{AtomicU32, Ordering};

use parse_display::{Display, FromStr};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Source of outbound sequence ids for this process.
static COUNTER: AtomicU32 = AtomicU32::new(0);

/// The sequence id attached to every request and echoed back in responses.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema, Display, FromStr)]
#[serde(untagged)]
#[display("{0}")]
pub enum SequenceId {
    /// A string sequence id.
    String(String),
    /// An integer sequence id.
    Integer(u32),
}

impl SequenceId {
    /// Create a new sequence id.
    pub fn new() -> Self {
        if cfg!(test) {
            Self::Integer(1)
        } else {
            Self::Integer(COUNTER.fetch_add(1, Ordering::Relaxed))
        }
    }
}

impl Default for SequenceId {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_id_accepts_string_and_integer() {
        let s: SequenceId = serde_json::from_str(r#""0""#).unwrap();
        assert_eq!(s, SequenceId::String("0".to_string()));

        let i: SequenceId = serde_json::from_str("42").unwrap();
        assert_eq!(i, SequenceId::Integer(42));
        assert_eq!(i.to_string(), "42");
    }
}

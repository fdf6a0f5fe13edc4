//! Movements: the credit/debit events recorded against an account.
//!
//! A movement is built in two steps. Callers hand raw fields to
//! [`MovementDraft::parse`], which validates them into typed values; the store
//! then commits the draft and stamps it with an `occurred_at` timestamp and a
//! store-wide `sequence` number, producing an immutable [`Movement`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::AccountId;

/// Maximum note length, in characters.
pub const NOTE_MAX_CHARS: usize = 10;

/// Direction of a movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MovementKind {
    #[serde(rename = "c")]
    Credit,
    #[serde(rename = "d")]
    Debit,
}

impl MovementKind {
    /// Parse the wire code (`"c"` or `"d"`). Matching is exact.
    pub fn parse(code: &str) -> DomainResult<Self> {
        match code {
            "c" => Ok(Self::Credit),
            "d" => Ok(Self::Debit),
            other => Err(DomainError::invalid_movement(format!(
                "kind must be 'c' or 'd', got '{other}'"
            ))),
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::Credit => "c",
            Self::Debit => "d",
        }
    }
}

impl core::fmt::Display for MovementKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.code())
    }
}

/// Strictly positive amount in cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Amount(i64);

impl Amount {
    pub fn new(cents: i64) -> DomainResult<Self> {
        if cents <= 0 {
            return Err(DomainError::invalid_movement(format!(
                "amount must be a positive number of cents, got {cents}"
            )));
        }
        Ok(Self(cents))
    }

    pub fn cents(self) -> i64 {
        self.0
    }
}

impl TryFrom<i64> for Amount {
    type Error = DomainError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for i64 {
    fn from(value: Amount) -> Self {
        value.0
    }
}

/// Free-text description attached to a movement (1 to 10 characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Note(String);

impl Note {
    pub fn new(text: impl Into<String>) -> DomainResult<Self> {
        let text = text.into();
        let len = text.chars().count();
        if len == 0 || len > NOTE_MAX_CHARS {
            return Err(DomainError::invalid_movement(format!(
                "note must be 1 to {NOTE_MAX_CHARS} characters, got {len}"
            )));
        }
        Ok(Self(text))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Note {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Note> for String {
    fn from(value: Note) -> Self {
        value.0
    }
}

/// A validated movement that has not been committed yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementDraft {
    pub account_id: AccountId,
    pub kind: MovementKind,
    pub amount: Amount,
    pub note: Note,
}

impl MovementDraft {
    /// Validate raw request fields into a draft.
    ///
    /// Absent fields are rejected the same way as malformed ones.
    pub fn parse(
        account_id: AccountId,
        amount: Option<i64>,
        kind: Option<&str>,
        note: Option<&str>,
    ) -> DomainResult<Self> {
        let amount = amount
            .ok_or_else(|| DomainError::invalid_movement("amount is required"))
            .and_then(Amount::new)?;
        let kind = kind
            .ok_or_else(|| DomainError::invalid_movement("kind is required"))
            .and_then(MovementKind::parse)?;
        let note = note
            .ok_or_else(|| DomainError::invalid_movement("note is required"))
            .and_then(Note::new)?;

        Ok(Self {
            account_id,
            kind,
            amount,
            note,
        })
    }

    /// Signed effect on the balance: `+amount` for credits, `-amount` for debits.
    pub fn delta(&self) -> i64 {
        signed(self.kind, self.amount)
    }

    /// Commit the draft with the store-assigned position.
    pub fn commit(self, occurred_at: DateTime<Utc>, sequence: u64) -> Movement {
        Movement {
            account_id: self.account_id,
            kind: self.kind,
            amount: self.amount,
            note: self.note,
            occurred_at,
            sequence,
        }
    }
}

/// An accepted, immutable movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    pub account_id: AccountId,
    pub kind: MovementKind,
    pub amount: Amount,
    pub note: Note,
    pub occurred_at: DateTime<Utc>,
    /// Store-wide, strictly increasing insertion position.
    pub sequence: u64,
}

impl Movement {
    pub fn delta(&self) -> i64 {
        signed(self.kind, self.amount)
    }
}

fn signed(kind: MovementKind, amount: Amount) -> i64 {
    match kind {
        MovementKind::Credit => amount.cents(),
        MovementKind::Debit => -amount.cents(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn account() -> AccountId {
        AccountId::new(1)
    }

    #[test]
    fn parse_accepts_well_formed_fields() {
        let draft = MovementDraft::parse(account(), Some(500), Some("d"), Some("rent")).unwrap();
        assert_eq!(draft.kind, MovementKind::Debit);
        assert_eq!(draft.amount.cents(), 500);
        assert_eq!(draft.note.as_str(), "rent");
        assert_eq!(draft.delta(), -500);
    }

    #[test]
    fn zero_or_missing_amount_is_invalid() {
        for amount in [None, Some(0), Some(-10)] {
            let err = MovementDraft::parse(account(), amount, Some("c"), Some("x")).unwrap_err();
            assert!(matches!(err, DomainError::InvalidMovement(_)), "{amount:?}");
        }
    }

    #[test]
    fn unknown_kind_is_invalid() {
        for kind in [None, Some(""), Some("C"), Some("credit"), Some("x")] {
            let err = MovementDraft::parse(account(), Some(1), kind, Some("x")).unwrap_err();
            assert!(matches!(err, DomainError::InvalidMovement(_)), "{kind:?}");
        }
    }

    #[test]
    fn note_length_bounds() {
        assert!(Note::new("").is_err());
        assert!(Note::new("a").is_ok());
        assert!(Note::new("abcdefghij").is_ok());
        assert!(Note::new("abcdefghijk").is_err());
    }

    #[test]
    fn note_length_counts_characters_not_bytes() {
        // 10 characters, 20 bytes.
        let text = "\u{e9}".repeat(10);
        assert_eq!(text.len(), 20);
        assert!(Note::new(text).is_ok());
    }

    #[test]
    fn kind_serializes_to_wire_code() {
        assert_eq!(serde_json::to_string(&MovementKind::Credit).unwrap(), "\"c\"");
        assert_eq!(serde_json::to_string(&MovementKind::Debit).unwrap(), "\"d\"");
    }

    #[test]
    fn deserializing_invalid_note_fails() {
        let res: Result<Note, _> = serde_json::from_str("\"this is too long\"");
        assert!(res.is_err());
    }

    #[test]
    fn commit_preserves_fields() {
        let draft = MovementDraft::parse(account(), Some(300), Some("c"), Some("pay")).unwrap();
        let at = Utc::now();
        let movement = draft.clone().commit(at, 9);
        assert_eq!(movement.account_id, draft.account_id);
        assert_eq!(movement.delta(), 300);
        assert_eq!(movement.occurred_at, at);
        assert_eq!(movement.sequence, 9);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: a note is accepted exactly when it has 1..=10 characters.
        #[test]
        fn note_accepted_iff_length_in_bounds(text in "\\PC{0,16}") {
            let len = text.chars().count();
            prop_assert_eq!(Note::new(text).is_ok(), (1..=NOTE_MAX_CHARS).contains(&len));
        }

        /// Property: credits and debits of the same amount cancel out.
        #[test]
        fn credit_and_debit_deltas_cancel(cents in 1i64..i64::MAX) {
            let credit = MovementDraft::parse(account(), Some(cents), Some("c"), Some("x")).unwrap();
            let debit = MovementDraft::parse(account(), Some(cents), Some("d"), Some("x")).unwrap();
            prop_assert_eq!(credit.delta() + debit.delta(), 0);
        }
    }
}

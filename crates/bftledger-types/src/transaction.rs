//! Ledger transactions.
//!
//! Consensus agrees on opaque string values; in this system a value is
//! always the JSON encoding of a [`Transaction`]:
//!
//! ```text
//! {"source":"<b64>","destination":"<b64>","amount":500}
//! {"source":"<b64>","isCheckBalance":true}
//! ```
//!
//! Accounts are named by the base64 form of their owner's public key.

use serde::{Deserialize, Serialize};

use crate::TransactionError;

/// Fee charged to the source of every successful transfer and paid to the
/// leader of the round in which the transfer committed.
pub const FEE: i64 = 10;

/// Balance every account starts with.
pub const INITIAL_BALANCE: i64 = 10_000;

/// A decided ledger operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTransaction", into = "RawTransaction")]
pub enum Transaction {
    Transfer {
        source: String,
        destination: String,
        amount: i64,
    },
    CheckBalance {
        source: String,
    },
}

impl Transaction {
    pub fn transfer(source: impl Into<String>, destination: impl Into<String>, amount: i64) -> Self {
        Self::Transfer {
            source: source.into(),
            destination: destination.into(),
            amount,
        }
    }

    pub fn check_balance(source: impl Into<String>) -> Self {
        Self::CheckBalance {
            source: source.into(),
        }
    }

    /// Account that authored the transaction.
    pub fn source(&self) -> &str {
        match self {
            Self::Transfer { source, .. } | Self::CheckBalance { source } => source,
        }
    }

    pub fn is_check_balance(&self) -> bool {
        matches!(self, Self::CheckBalance { .. })
    }

    /// Encodes the transaction as a consensus value.
    pub fn to_value(&self) -> String {
        match self {
            Self::Transfer {
                source,
                destination,
                amount,
            } => serde_json::json!({
                "source": source,
                "destination": destination,
                "amount": amount,
            }),
            Self::CheckBalance { source } => serde_json::json!({
                "source": source,
                "isCheckBalance": true,
            }),
        }
        .to_string()
    }

    /// Decodes a consensus value.
    pub fn from_value(value: &str) -> Result<Self, TransactionError> {
        Ok(serde_json::from_str(value)?)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTransaction {
    source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    destination: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    amount: Option<i64>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    is_check_balance: bool,
}

impl TryFrom<RawTransaction> for Transaction {
    type Error = TransactionError;

    fn try_from(raw: RawTransaction) -> Result<Self, Self::Error> {
        if raw.is_check_balance {
            return Ok(Self::CheckBalance { source: raw.source });
        }
        Ok(Self::Transfer {
            source: raw.source,
            destination: raw
                .destination
                .ok_or(TransactionError::MissingField("destination"))?,
            amount: raw.amount.ok_or(TransactionError::MissingField("amount"))?,
        })
    }
}

impl From<Transaction> for RawTransaction {
    fn from(transaction: Transaction) -> Self {
        match transaction {
            Transaction::Transfer {
                source,
                destination,
                amount,
            } => Self {
                source,
                destination: Some(destination),
                amount: Some(amount),
                is_check_balance: false,
            },
            Transaction::CheckBalance { source } => Self {
                source,
                destination: None,
                amount: None,
                is_check_balance: true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_value_shape() {
        let value = Transaction::transfer("alice", "bob", 500).to_value();
        let json: serde_json::Value = serde_json::from_str(&value).unwrap();

        assert_eq!(json["source"], "alice");
        assert_eq!(json["destination"], "bob");
        assert_eq!(json["amount"], 500);
        assert!(json.get("isCheckBalance").is_none());
    }

    #[test]
    fn check_balance_value_shape() {
        let value = Transaction::check_balance("alice").to_value();
        let json: serde_json::Value = serde_json::from_str(&value).unwrap();

        assert_eq!(json["source"], "alice");
        assert_eq!(json["isCheckBalance"], true);
        assert!(json.get("amount").is_none());
    }

    #[test]
    fn values_decode_back() {
        for tx in [
            Transaction::transfer("alice", "bob", 500),
            Transaction::check_balance("carol"),
        ] {
            assert_eq!(Transaction::from_value(&tx.to_value()).unwrap(), tx);
        }
    }

    #[test]
    fn serde_and_to_value_agree() {
        let tx = Transaction::transfer("alice", "bob", 7);
        let via_serde = serde_json::to_string(&tx).unwrap();
        assert_eq!(
            Transaction::from_value(&via_serde).unwrap(),
            Transaction::from_value(&tx.to_value()).unwrap()
        );
    }

    #[test]
    fn transfer_without_amount_is_rejected() {
        let err = Transaction::from_value(r#"{"source":"a","destination":"b"}"#).unwrap_err();
        assert!(err.to_string().contains("amount"));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(Transaction::from_value("not json").is_err());
        assert!(Transaction::from_value("{}").is_err());
    }
}

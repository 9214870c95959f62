/// Transaction types for railchain
use crate::error::ChainError;
use serde::{Deserialize, Serialize};

/// Sender used for miner reward transactions.
pub const REWARD_SENDER: &str = "0";

/// A transfer recorded in a block. `amount` is the wire form: either
/// `"<obfuscated>,<base64 signature>"` for user transfers or a plain number
/// for miner rewards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub amount: String,
    pub recipient: String,
    pub sender: String,
}

impl Transaction {
    pub fn new(sender: impl Into<String>, recipient: impl Into<String>, amount: impl Into<String>) -> Self {
        Transaction {
            amount: amount.into(),
            recipient: recipient.into(),
            sender: sender.into(),
        }
    }

    /// Reward transactions carry the plain amount, no transposition and no signature.
    pub fn reward(recipient: impl Into<String>, amount: f64) -> Self {
        Self::new(REWARD_SENDER, recipient, amount.to_string())
    }

    pub fn is_reward(&self) -> bool {
        self.sender == REWARD_SENDER && !self.amount.contains(',')
    }

    pub fn encoded_amount(&self) -> EncodedAmount<'_> {
        EncodedAmount::parse(&self.amount)
    }
}

/// Borrowed split of a wire amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedAmount<'a> {
    pub obfuscated: &'a str,
    pub signature: Option<&'a str>,
}

impl<'a> EncodedAmount<'a> {
    pub fn parse(wire: &'a str) -> Self {
        match wire.split_once(',') {
            Some((obfuscated, signature)) => EncodedAmount {
                obfuscated,
                signature: Some(signature),
            },
            None => EncodedAmount {
                obfuscated: wire,
                signature: None,
            },
        }
    }

    pub fn to_wire(&self) -> String {
        match self.signature {
            Some(signature) => format!("{},{}", self.obfuscated, signature),
            None => self.obfuscated.to_string(),
        }
    }
}

/// Parses decimal amount text. Negative and non-finite values are rejected.
pub fn parse_amount(text: &str) -> Result<f64, ChainError> {
    let amount: f64 = text
        .trim()
        .parse()
        .map_err(|_| ChainError::MalformedRequest(format!("amount '{}' is not a number", text)))?;

    if !amount.is_finite() || amount < 0.0 {
        return Err(ChainError::MalformedRequest(format!(
            "amount must be a non-negative finite number, got {}",
            text
        )));
    }
    Ok(amount)
}

/// Decoded view of a committed transaction, as listed to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionView {
    pub amount: String,
    pub recipient: String,
    pub sender: String,
}

impl TransactionView {
    pub fn new(tx: &Transaction, plain_amount: &str, verified: bool) -> Self {
        TransactionView {
            amount: format!("{}, verified: {}", plain_amount, verified),
            recipient: tx.recipient.clone(),
            sender: tx.sender.clone(),
        }
    }
}

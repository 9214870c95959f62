use crate::error::ChainError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_INITIAL_BALANCE: f64 = 100.0;

/// Participant balances. Participants are granted `initial_balance` the first
/// time a transfer references them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceSheet {
    initial_balance: f64,
    balances: BTreeMap<String, f64>,
}

impl Default for BalanceSheet {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_BALANCE)
    }
}

impl BalanceSheet {
    pub fn new(initial_balance: f64) -> Self {
        Self {
            initial_balance,
            balances: BTreeMap::new(),
        }
    }

    /// Read-only lookup; unseen participants report 0.
    pub fn get_balance(&self, participant: &str) -> f64 {
        self.balances.get(participant).copied().unwrap_or(0.0)
    }

    pub fn all(&self) -> &BTreeMap<String, f64> {
        &self.balances
    }

    fn touch(&mut self, participant: &str) -> f64 {
        *self
            .balances
            .entry(participant.to_string())
            .or_insert(self.initial_balance)
    }

    /// Moves `amount` from `sender` to `recipient`, initializing both on first
    /// sight. Fails without debiting if the sender cannot cover it.
    pub fn transfer(&mut self, sender: &str, recipient: &str, amount: f64) -> Result<(), ChainError> {
        let balance = self.touch(sender);
        self.touch(recipient);

        if balance < amount {
            return Err(ChainError::InsufficientFunds {
                participant: sender.to_string(),
                balance,
                requested: amount,
            });
        }

        if let Some(b) = self.balances.get_mut(sender) {
            *b -= amount;
        }
        if let Some(b) = self.balances.get_mut(recipient) {
            *b += amount;
        }
        Ok(())
    }

    /// Mints `amount` to `recipient` without a paying side.
    pub fn credit(&mut self, recipient: &str, amount: f64) {
        self.touch(recipient);
        if let Some(b) = self.balances.get_mut(recipient) {
            *b += amount;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_conserves_value() {
        let mut sheet = BalanceSheet::default();
        sheet.transfer("alice", "bob", 50.0).unwrap();

        assert_eq!(sheet.get_balance("alice"), 50.0);
        assert_eq!(sheet.get_balance("bob"), 150.0);
        assert_eq!(sheet.all().values().sum::<f64>(), 200.0);
    }

    #[test]
    fn test_insufficient_funds_leaves_balances() {
        let mut sheet = BalanceSheet::default();
        sheet.transfer("alice", "bob", 10.0).unwrap();

        let err = sheet.transfer("alice", "bob", 150.0).unwrap_err();
        assert!(matches!(err, ChainError::InsufficientFunds { requested, .. } if requested == 150.0));
        assert_eq!(sheet.get_balance("alice"), 90.0);
        assert_eq!(sheet.get_balance("bob"), 110.0);
    }

    #[test]
    fn test_self_transfer_keeps_balance() {
        let mut sheet = BalanceSheet::default();
        sheet.transfer("alice", "alice", 30.0).unwrap();
        assert_eq!(sheet.get_balance("alice"), 100.0);
    }

    #[test]
    fn test_unseen_participant_reads_zero() {
        let sheet = BalanceSheet::default();
        assert_eq!(sheet.get_balance("nobody"), 0.0);
        assert!(sheet.all().is_empty());
    }

    #[test]
    fn test_credit_mints() {
        let mut sheet = BalanceSheet::new(10.0);
        sheet.credit("miner", 5.0);
        assert_eq!(sheet.get_balance("miner"), 15.0);
    }
}

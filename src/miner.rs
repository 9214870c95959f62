//! Proof-of-work search and mining reward construction

use crate::blockchain::canonical_json;
use crate::error::ChainError;
use crate::transaction::{Transaction, TransactionCodec};
use sha2::{Digest, Sha256};

pub const DEFAULT_DIFFICULTY_PREFIX: &str = "0000";
pub const DEFAULT_REWARD_RATIO: f64 = 0.1;

/// How many nonces are tried between cancellation checks.
const CANCEL_CHECK_INTERVAL: u64 = 4096;

/// Difficulty predicate: the hex digest must start with `prefix`.
/// Every node of a network has to agree on the prefix, otherwise their
/// chains are mutually invalid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Difficulty {
    prefix: String,
}

impl Default for Difficulty {
    fn default() -> Self {
        Difficulty {
            prefix: DEFAULT_DIFFICULTY_PREFIX.to_string(),
        }
    }
}

impl Difficulty {
    pub fn new(prefix: impl Into<String>) -> Result<Self, ChainError> {
        let prefix = prefix.into();
        if prefix.len() > 64 || !prefix.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')) {
            return Err(ChainError::ConfigError(format!(
                "difficulty prefix must be at most 64 lowercase hex digits, got '{}'",
                prefix
            )));
        }
        Ok(Difficulty { prefix })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn is_satisfied_by(&self, hex_digest: &str) -> bool {
        hex_digest.starts_with(&self.prefix)
    }
}

/// Hasher pre-loaded with everything but the nonce.
fn proof_hasher(index: u64, hash_of_previous_block: &str, transactions: &[Transaction]) -> Result<Sha256, ChainError> {
    let mut hasher = Sha256::new();
    hasher.update(index.to_string().as_bytes());
    hasher.update(hash_of_previous_block.as_bytes());
    hasher.update(canonical_json(&transactions)?.as_bytes());
    Ok(hasher)
}

fn digest_with_nonce(base: &Sha256, nonce: u64) -> String {
    let mut hasher = base.clone();
    hasher.update(nonce.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// `hash(index ++ prev_hash ++ canonical(transactions) ++ nonce)` meets the difficulty.
pub fn valid_proof(
    index: u64,
    hash_of_previous_block: &str,
    transactions: &[Transaction],
    nonce: u64,
    difficulty: &Difficulty,
) -> bool {
    match proof_hasher(index, hash_of_previous_block, transactions) {
        Ok(base) => difficulty.is_satisfied_by(&digest_with_nonce(&base, nonce)),
        Err(e) => {
            tracing::warn!("cannot encode transactions for proof check: {}", e);
            false
        }
    }
}

/// Linear nonce search from 0. Unbounded and blocking.
pub fn proof_of_work(
    index: u64,
    hash_of_previous_block: &str,
    transactions: &[Transaction],
    difficulty: &Difficulty,
) -> Result<u64, ChainError> {
    proof_of_work_until(index, hash_of_previous_block, transactions, difficulty, || false)?
        .ok_or_else(|| ChainError::MiningAborted("nonce space exhausted".to_string()))
}

/// Same search as [`proof_of_work`], polling `should_stop` periodically.
/// Returns `Ok(None)` when stopped before a nonce was found.
pub fn proof_of_work_until<F>(
    index: u64,
    hash_of_previous_block: &str,
    transactions: &[Transaction],
    difficulty: &Difficulty,
    should_stop: F,
) -> Result<Option<u64>, ChainError>
where
    F: Fn() -> bool,
{
    let base = proof_hasher(index, hash_of_previous_block, transactions)?;

    let mut nonce: u64 = 0;
    loop {
        if nonce % CANCEL_CHECK_INTERVAL == 0 && should_stop() {
            return Ok(None);
        }
        if difficulty.is_satisfied_by(&digest_with_nonce(&base, nonce)) {
            return Ok(Some(nonce));
        }
        nonce = match nonce.checked_add(1) {
            Some(n) => n,
            None => return Ok(None),
        };
    }
}

/// Reward paid to the miner: `ratio` of the first pending transfer's decoded
/// amount. Nothing is paid when the block would be empty.
pub fn reward_transaction(
    pending: &[Transaction],
    miner_identifier: &str,
    ratio: f64,
    codec: &TransactionCodec,
) -> Result<Option<Transaction>, ChainError> {
    let Some(first) = pending.first() else {
        return Ok(None);
    };
    let amount = codec.value(&first.amount)?;
    Ok(Some(Transaction::reward(miner_identifier, amount * ratio)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;

    fn easy() -> Difficulty {
        Difficulty::new("00").unwrap()
    }

    #[test]
    fn test_difficulty_rejects_bad_prefix() {
        assert!(Difficulty::new("00x").is_err());
        assert!(Difficulty::new("00AB").is_err());
        assert!(Difficulty::new("").is_ok());
        assert_eq!(Difficulty::default().prefix(), "0000");
    }

    #[test]
    fn test_found_nonce_is_valid() {
        let txs = vec![Transaction::new("alice", "bob", "05,sig")];
        let nonce = proof_of_work(3, "abcdef", &txs, &easy()).unwrap();

        assert!(valid_proof(3, "abcdef", &txs, nonce, &easy()));
        // the search is linear, so no smaller nonce works
        assert!((0..nonce).all(|n| !valid_proof(3, "abcdef", &txs, n, &easy())));
    }

    #[test]
    fn test_proof_depends_on_every_input() {
        let txs = vec![Transaction::new("alice", "bob", "05,sig")];
        let difficulty = Difficulty::new("000").unwrap();
        let nonce = proof_of_work(1, "prev", &txs, &difficulty).unwrap();

        assert!(valid_proof(1, "prev", &txs, nonce, &difficulty));
        let changed = vec![Transaction::new("alice", "carol", "05,sig")];
        let still_valid = valid_proof(2, "prev", &txs, nonce, &difficulty)
            && valid_proof(1, "other", &txs, nonce, &difficulty)
            && valid_proof(1, "prev", &changed, nonce, &difficulty);
        assert!(!still_valid);
    }

    #[test]
    fn test_empty_prefix_accepts_nonce_zero() {
        assert_eq!(proof_of_work(0, "x", &[], &Difficulty::new("").unwrap()).unwrap(), 0);
    }

    #[test]
    fn test_search_can_be_stopped() {
        let impossible = Difficulty::new("0".repeat(64)).unwrap();
        let result = proof_of_work_until(0, "x", &[], &impossible, || true).unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn test_reward_is_ratio_of_first_pending() {
        let codec = TransactionCodec::default();
        let keypair = KeyPair::generate();
        let pending = vec![
            Transaction::new("alice", "bob", codec.seal("50", &keypair).unwrap()),
            Transaction::new("bob", "carol", codec.seal("20", &keypair).unwrap()),
        ];

        let reward = reward_transaction(&pending, "miner", 0.1, &codec).unwrap().unwrap();
        assert_eq!(reward.sender, "0");
        assert_eq!(reward.recipient, "miner");
        assert_eq!(reward.amount, "5");
        assert!(reward_transaction(&[], "miner", 0.1, &codec).unwrap().is_none());
    }
}

use crate::blockchain::core::state::{BalanceSheet, DEFAULT_INITIAL_BALANCE};
use crate::blockchain::core::validation::validate_chain;
use crate::error::ChainError;
use crate::miner::{proof_of_work, Difficulty};
use crate::transaction::{Transaction, TransactionCodec};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Literal hashed to seed the genesis block's previous-hash field.
pub const GENESIS_SEED: &str = "genesis_block";

/// Deterministic JSON encoding: object keys sorted, no whitespace.
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<String, ChainError> {
    // serde_json's default Map is a BTreeMap, so going through Value sorts keys
    let value = serde_json::to_value(value)?;
    Ok(value.to_string())
}

/// SHA-256 hex digest of the canonical encoding.
pub fn canonical_hash<T: Serialize + ?Sized>(value: &T) -> Result<String, ChainError> {
    let encoded = canonical_json(value)?;
    Ok(hex::encode(Sha256::digest(encoded.as_bytes())))
}

pub fn genesis_hash() -> String {
    hex::encode(Sha256::digest(format!("\"{}\"", GENESIS_SEED).as_bytes()))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    pub timestamp: f64,
    pub transactions: Vec<Transaction>,
    pub nonce: u64,
    pub hash_of_previous_block: String,
}

impl Block {
    pub fn hash(&self) -> Result<String, ChainError> {
        canonical_hash(self)
    }
}

fn now_seconds() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Tunables fixed for the lifetime of a ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerSettings {
    pub initial_balance: f64,
    pub codec: TransactionCodec,
    pub difficulty: Difficulty,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            initial_balance: DEFAULT_INITIAL_BALANCE,
            codec: TransactionCodec::default(),
            difficulty: Difficulty::default(),
        }
    }
}

/// In-memory chain history, pending transfers and the balance table.
#[derive(Debug)]
pub struct Ledger {
    chain: Vec<Block>,
    pending: Vec<Transaction>,
    balances: BalanceSheet,
    settings: LedgerSettings,
    /// Count of chain replacements. Shared so a search running outside the
    /// lock can see a replacement without taking it.
    epoch: Arc<AtomicU64>,
}

impl Ledger {
    /// Creates a ledger seeded with a freshly mined genesis block.
    pub fn new(settings: LedgerSettings) -> Result<Self, ChainError> {
        let mut ledger = Ledger {
            chain: Vec::new(),
            pending: Vec::new(),
            balances: BalanceSheet::new(settings.initial_balance),
            settings,
            epoch: Arc::new(AtomicU64::new(0)),
        };

        let seed = genesis_hash();
        let nonce = proof_of_work(0, &seed, &[], &ledger.settings.difficulty)?;
        ledger.append_block(nonce, seed);
        Ok(ledger)
    }

    pub fn settings(&self) -> &LedgerSettings {
        &self.settings
    }

    pub fn chain(&self) -> &[Block] {
        &self.chain
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    pub fn pending(&self) -> &[Transaction] {
        &self.pending
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub fn epoch_handle(&self) -> Arc<AtomicU64> {
        self.epoch.clone()
    }

    pub fn last_block(&self) -> Result<&Block, ChainError> {
        self.chain.last().ok_or(ChainError::EmptyChain)
    }

    pub fn hash_block(&self, block: &Block) -> Result<String, ChainError> {
        block.hash()
    }

    /// Seals the pending transactions into a new block. The nonce is trusted;
    /// finding a valid one is the miner's job.
    pub fn append_block(&mut self, nonce: u64, hash_of_previous_block: String) -> Block {
        let transactions = std::mem::take(&mut self.pending);
        self.push_block(nonce, hash_of_previous_block, transactions)
    }

    fn push_block(&mut self, nonce: u64, hash_of_previous_block: String, transactions: Vec<Transaction>) -> Block {
        let block = Block {
            index: self.chain.len() as u64,
            timestamp: now_seconds(),
            transactions,
            nonce,
            hash_of_previous_block,
        };
        self.chain.push(block.clone());
        block
    }

    /// Debits `sender`, credits `recipient` and queues the transfer. Returns
    /// the index of the block that will carry it.
    pub fn apply_transaction(&mut self, sender: &str, recipient: &str, encoded_amount: &str) -> Result<u64, ChainError> {
        let amount = self.settings.codec.value(encoded_amount)?;
        self.balances.transfer(sender, recipient, amount)?;

        self.pending.push(Transaction::new(sender, recipient, encoded_amount));
        Ok(self.chain.len() as u64)
    }

    /// Mints a reward already carried by a committed block. Nothing is debited.
    pub fn credit_reward(&mut self, reward: &Transaction) -> Result<(), ChainError> {
        let amount = self.settings.codec.value(&reward.amount)?;
        self.balances.credit(&reward.recipient, amount);
        Ok(())
    }

    pub fn get_balance(&self, participant: &str) -> f64 {
        self.balances.get_balance(participant)
    }

    pub fn balances(&self) -> &BalanceSheet {
        &self.balances
    }

    pub fn is_chain_valid(&self, candidate: &[Block]) -> bool {
        validate_chain(candidate, &self.settings.difficulty).is_ok()
    }

    /// Every committed transaction, oldest first.
    pub fn transactions(&self) -> impl Iterator<Item = &Transaction> {
        self.chain.iter().flat_map(|b| b.transactions.iter())
    }

    /// Empties the pending list for an out-of-lock mining attempt.
    pub fn take_pending(&mut self) -> Vec<Transaction> {
        std::mem::take(&mut self.pending)
    }

    /// Puts back transactions from an abandoned mining attempt, ahead of
    /// anything queued since.
    pub fn restore_pending(&mut self, mut transactions: Vec<Transaction>) {
        transactions.append(&mut self.pending);
        self.pending = transactions;
    }

    /// Appends a block mined outside the lock, provided the tip it was mined
    /// on is still the tip.
    pub fn commit_mined(
        &mut self,
        index: u64,
        hash_of_previous_block: String,
        transactions: Vec<Transaction>,
        nonce: u64,
    ) -> Result<Block, (ChainError, Vec<Transaction>)> {
        let tip_hash = match self.last_block().and_then(|b| b.hash()) {
            Ok(hash) => hash,
            Err(e) => return Err((e, transactions)),
        };
        if self.chain.len() as u64 != index || tip_hash != hash_of_previous_block {
            return Err((
                ChainError::MiningAborted(format!(
                    "chain tip moved while mining block {} (now {} blocks)",
                    index,
                    self.chain.len()
                )),
                transactions,
            ));
        }
        Ok(self.push_block(nonce, hash_of_previous_block, transactions))
    }

    /// Adopts `candidate` if it is strictly longer than the current chain and
    /// fully valid. Pending transfers and balances are left as they are.
    pub fn replace_chain(&mut self, candidate: Vec<Block>) -> Result<bool, ChainError> {
        if candidate.len() <= self.chain.len() {
            return Ok(false);
        }
        validate_chain(&candidate, &self.settings.difficulty)?;
        self.chain = candidate;
        self.epoch.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::miner::valid_proof;

    fn settings() -> LedgerSettings {
        LedgerSettings {
            difficulty: Difficulty::new("00").unwrap(),
            ..LedgerSettings::default()
        }
    }

    fn mine(ledger: &mut Ledger) -> Block {
        let prev = ledger.last_block().unwrap().hash().unwrap();
        let index = ledger.len() as u64;
        let nonce = proof_of_work(index, &prev, ledger.pending(), &ledger.settings().difficulty).unwrap();
        ledger.append_block(nonce, prev)
    }

    #[test]
    fn test_genesis_is_deterministic() {
        assert_eq!(genesis_hash(), genesis_hash());
        assert_eq!(genesis_hash(), canonical_hash(GENESIS_SEED).unwrap());

        let a = Ledger::new(settings()).unwrap();
        let b = Ledger::new(settings()).unwrap();
        assert_eq!(a.chain()[0].hash_of_previous_block, genesis_hash());
        assert_eq!(b.chain()[0].hash_of_previous_block, genesis_hash());
        assert_eq!(a.chain()[0].nonce, b.chain()[0].nonce);
        assert!(valid_proof(0, &genesis_hash(), &[], a.chain()[0].nonce, &settings().difficulty));
    }

    #[test]
    fn test_canonical_json_sorts_keys() {
        let tx = Transaction::new("s", "r", "1");
        assert_eq!(canonical_json(&tx).unwrap(), r#"{"amount":"1","recipient":"r","sender":"s"}"#);

        let block = Block {
            index: 1,
            timestamp: 1.5,
            transactions: vec![],
            nonce: 7,
            hash_of_previous_block: "ab".to_string(),
        };
        assert_eq!(
            canonical_json(&block).unwrap(),
            r#"{"hash_of_previous_block":"ab","index":1,"nonce":7,"timestamp":1.5,"transactions":[]}"#
        );
    }

    #[test]
    fn test_appended_chain_is_valid_and_pending_cleared() {
        let mut ledger = Ledger::new(settings()).unwrap();
        let keypair = KeyPair::generate();
        let wire = ledger.settings().codec.seal("10", &keypair).unwrap();

        assert_eq!(ledger.apply_transaction("alice", "bob", &wire).unwrap(), 1);
        let block = mine(&mut ledger);
        assert_eq!(block.index, 1);
        assert_eq!(block.transactions.len(), 1);
        assert!(ledger.pending().is_empty());

        mine(&mut ledger);
        assert_eq!(ledger.len(), 3);
        assert!(ledger.is_chain_valid(ledger.chain()));
        assert_eq!(ledger.chain()[2].hash_of_previous_block, ledger.chain()[1].hash().unwrap());
    }

    #[test]
    fn test_apply_transaction_balances() {
        let mut ledger = Ledger::new(settings()).unwrap();
        let keypair = KeyPair::generate();
        let codec = ledger.settings().codec;

        ledger.apply_transaction("alice", "bob", &codec.seal("50", &keypair).unwrap()).unwrap();
        assert_eq!(ledger.get_balance("alice"), 50.0);
        assert_eq!(ledger.get_balance("bob"), 150.0);

        let err = ledger
            .apply_transaction("alice", "bob", &codec.seal("150", &keypair).unwrap())
            .unwrap_err();
        assert!(matches!(err, ChainError::InsufficientFunds { .. }));
        assert_eq!(ledger.get_balance("alice"), 50.0);
        assert_eq!(ledger.get_balance("bob"), 150.0);
        assert_eq!(ledger.pending().len(), 1);
    }

    #[test]
    fn test_malformed_amount_rejected_without_mutation() {
        let mut ledger = Ledger::new(settings()).unwrap();
        let err = ledger.apply_transaction("alice", "bob", "x1y,c2lnbmF0dXJl").unwrap_err();

        assert!(matches!(err, ChainError::MalformedRequest(_)));
        assert!(ledger.balances().all().is_empty());
        assert!(ledger.pending().is_empty());
    }

    #[test]
    fn test_reward_mints_without_debit() {
        let mut ledger = Ledger::new(settings()).unwrap();
        ledger.credit_reward(&Transaction::reward("miner", 5.0)).unwrap();

        assert_eq!(ledger.get_balance("miner"), 105.0);
        assert_eq!(ledger.get_balance("0"), 0.0);
    }

    #[test]
    fn test_commit_mined_detects_moved_tip() {
        let mut ledger = Ledger::new(settings()).unwrap();
        let prev = ledger.last_block().unwrap().hash().unwrap();
        let stale = vec![Transaction::reward("miner", 1.0)];

        mine(&mut ledger);
        let (err, returned) = ledger.commit_mined(1, prev, stale.clone(), 0).unwrap_err();
        assert!(matches!(err, ChainError::MiningAborted(_)));
        assert_eq!(returned, stale);

        ledger.restore_pending(returned);
        assert_eq!(ledger.pending(), stale.as_slice());
    }

    #[test]
    fn test_restore_pending_keeps_order() {
        let mut ledger = Ledger::new(settings()).unwrap();
        ledger.apply_transaction("alice", "late", "1").unwrap();
        ledger.restore_pending(vec![Transaction::reward("early", 1.0)]);

        let recipients: Vec<_> = ledger.pending().iter().map(|t| t.recipient.as_str()).collect();
        assert_eq!(recipients, vec!["early", "late"]);
    }

    #[test]
    fn test_replace_chain_requires_longer_and_valid() {
        let mut local = Ledger::new(settings()).unwrap();
        let mut remote = Ledger::new(settings()).unwrap();
        mine(&mut remote);
        mine(&mut remote);

        assert!(!local.replace_chain(local.chain().to_vec()).unwrap());
        assert_eq!(local.epoch(), 0);

        let mut forged = remote.chain().to_vec();
        forged[2].hash_of_previous_block = "ff".repeat(32);
        assert!(local.replace_chain(forged).is_err());
        assert_eq!(local.len(), 1);

        assert_eq!(local.epoch(), 0);

        let handle = local.epoch_handle();
        assert!(local.replace_chain(remote.chain().to_vec()).unwrap());
        assert_eq!(local.chain(), remote.chain());
        assert_eq!(handle.load(Ordering::SeqCst), 1);
    }
}

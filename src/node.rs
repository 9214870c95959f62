use crate::blockchain::{Block, Ledger};
use crate::config::Config;
use crate::crypto::KeyPair;
use crate::error::ChainError;
use crate::miner::{proof_of_work_until, reward_transaction, Difficulty};
use crate::network::{ChainResponse, Peer, PeerClient, PeerRegistry};
use crate::sync::{ChainSynchronizer, SyncStats};
use crate::transaction::{parse_amount, Transaction, TransactionView};
use rand::RngCore;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Ready,
    ShuttingDown,
}

/// Per-process context: the ledger, this node's key pair and identity, and
/// its peers. Built once at startup and shared by handle.
pub struct Node {
    pub config: Config,
    pub ledger: Arc<RwLock<Ledger>>,
    pub peers: Arc<PeerRegistry>,
    pub state: Arc<RwLock<NodeState>>,
    keypair: KeyPair,
    identifier: String,
    client: PeerClient,
    synchronizer: ChainSynchronizer,
    shutdown: Arc<AtomicBool>,
    blocks_mined: AtomicU64,
}

struct MiningJob {
    index: u64,
    previous_hash: String,
    transactions: Vec<Transaction>,
    reward: Option<Transaction>,
    difficulty: Difficulty,
    epoch: u64,
    chain_epoch: Arc<AtomicU64>,
}

fn random_identifier() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

impl Node {
    /// Mines the genesis block and generates a fresh key pair and identifier.
    pub fn init(config: Config) -> Result<Self, ChainError> {
        Self::with_keypair(config, KeyPair::generate())
    }

    pub fn with_keypair(config: Config, keypair: KeyPair) -> Result<Self, ChainError> {
        config.validate()?;
        let ledger = Ledger::new(config.ledger_settings()?)?;
        let client = PeerClient::new(config.network.request_timeout())?;
        let identifier = random_identifier();

        info!(
            node = %identifier,
            difficulty = %ledger.settings().difficulty.prefix(),
            rail_fence_key = ledger.settings().codec.key(),
            "ledger initialised with genesis block"
        );

        Ok(Self {
            config,
            ledger: Arc::new(RwLock::new(ledger)),
            peers: Arc::new(PeerRegistry::new()),
            state: Arc::new(RwLock::new(NodeState::Ready)),
            keypair,
            identifier,
            client,
            synchronizer: ChainSynchronizer::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
            blocks_mined: AtomicU64::new(0),
        })
    }

    /// Stops any in-flight proof-of-work search and marks the node as going down.
    pub async fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        *self.state.write().await = NodeState::ShuttingDown;
        info!(node = %self.identifier, "node shutting down");
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn public_key_hex(&self) -> String {
        self.keypair.public_key_hex()
    }

    pub fn blocks_mined(&self) -> u64 {
        self.blocks_mined.load(Ordering::Relaxed)
    }

    pub async fn sync_stats(&self) -> SyncStats {
        self.synchronizer.get_stats().await
    }

    pub async fn chain(&self) -> ChainResponse {
        let ledger = self.ledger.read().await;
        ChainResponse {
            chain: ledger.chain().to_vec(),
            length: ledger.len(),
        }
    }

    pub async fn balances(&self) -> BTreeMap<String, f64> {
        self.ledger.read().await.balances().all().clone()
    }

    pub async fn get_balance(&self, participant: &str) -> f64 {
        self.ledger.read().await.get_balance(participant)
    }

    /// Seals `amount` (decimal text) with this node's key and queues the
    /// transfer. Returns the index of the block that will carry it.
    pub async fn submit_transaction(&self, sender: &str, recipient: &str, amount: &str) -> Result<u64, ChainError> {
        if sender.is_empty() || recipient.is_empty() || amount.trim().is_empty() {
            return Err(ChainError::MalformedRequest(
                "sender, recipient and amount are required".to_string(),
            ));
        }
        let amount = amount.trim();
        parse_amount(amount)?;

        let codec = self.ledger.read().await.settings().codec;
        let wire = codec.seal(amount, &self.keypair)?;

        let index = self.ledger.write().await.apply_transaction(sender, recipient, &wire);
        match &index {
            Ok(index) => info!(%sender, %recipient, block = index, "transaction queued"),
            Err(e) => warn!(%sender, %recipient, "transaction rejected: {}", e),
        }
        index
    }

    /// Snapshot taken under the write lock: drains pending, appends the
    /// reward and records the tip and epoch the search runs against.
    async fn prepare_mining(&self) -> Result<MiningJob, ChainError> {
        let mut ledger = self.ledger.write().await;
        let previous_hash = ledger.last_block()?.hash()?;
        let codec = ledger.settings().codec;

        let mut transactions = ledger.take_pending();
        let reward = match reward_transaction(
            &transactions,
            &self.identifier,
            self.config.miner.reward_ratio,
            &codec,
        ) {
            Ok(reward) => reward,
            Err(e) => {
                ledger.restore_pending(transactions);
                return Err(e);
            }
        };
        if let Some(reward) = &reward {
            transactions.push(reward.clone());
        }

        Ok(MiningJob {
            index: ledger.len() as u64,
            previous_hash,
            transactions,
            reward,
            difficulty: ledger.settings().difficulty.clone(),
            epoch: ledger.epoch(),
            chain_epoch: ledger.epoch_handle(),
        })
    }

    /// Mines the next block. The nonce search runs on a blocking thread with
    /// the ledger lock released; it stops early if the chain is replaced or
    /// the node shuts down, and the block is committed only if the tip is unchanged.
    pub async fn mine(&self) -> Result<Block, ChainError> {
        let job = self.prepare_mining().await?;
        let index = job.index;

        debug!(index, transactions = job.transactions.len(), "searching for nonce");
        let search = {
            let shutdown = self.shutdown.clone();
            let chain_epoch = job.chain_epoch.clone();
            let epoch = job.epoch;
            let difficulty = job.difficulty.clone();
            let previous_hash = job.previous_hash.clone();
            let candidate = job.transactions.clone();
            tokio::task::spawn_blocking(move || {
                proof_of_work_until(index, &previous_hash, &candidate, &difficulty, || {
                    shutdown.load(Ordering::Relaxed) || chain_epoch.load(Ordering::Relaxed) != epoch
                })
            })
            .await
        };

        let nonce = match search {
            Ok(Ok(Some(nonce))) => Ok(nonce),
            Ok(Ok(None)) => Err(ChainError::MiningAborted(format!(
                "search for block {} was cancelled",
                index
            ))),
            Ok(Err(e)) => Err(e),
            Err(e) => Err(ChainError::MiningAborted(format!("mining task failed: {}", e))),
        };

        let MiningJob {
            previous_hash,
            transactions,
            reward,
            ..
        } = job;
        let mut ledger = self.ledger.write().await;
        let committed = match nonce {
            Ok(nonce) => ledger.commit_mined(index, previous_hash, transactions, nonce),
            Err(e) => Err((e, transactions)),
        };

        match committed {
            Ok(block) => {
                if let Some(reward) = &reward {
                    ledger.credit_reward(reward)?;
                }
                self.blocks_mined.fetch_add(1, Ordering::SeqCst);
                info!(index = block.index, nonce = block.nonce, "mined new block");
                Ok(block)
            }
            Err((e, mut transactions)) => {
                if reward.is_some() && transactions.last().is_some_and(Transaction::is_reward) {
                    transactions.pop();
                }
                ledger.restore_pending(transactions);
                warn!(index, "mining attempt abandoned: {}", e);
                Err(e)
            }
        }
    }

    /// Pushes our existence to every peer and asks each to sync. Failing peers
    /// are skipped. Returns how many peers took both calls.
    pub async fn broadcast(&self, own_url: &str) -> usize {
        let mut reached = 0;
        for peer in self.peers.peers() {
            if let Err(e) = self.client.announce(&peer, own_url).await {
                warn!(peer = %peer.host, "announce failed: {}", ChainError::from(e));
                continue;
            }
            if let Err(e) = self.client.request_sync(&peer).await {
                warn!(peer = %peer.host, "sync request failed: {}", ChainError::from(e));
                continue;
            }
            reached += 1;
        }
        reached
    }

    /// URL peers should use to reach us.
    pub fn advertised_url(&self, request_host: Option<&str>) -> Option<String> {
        self.config
            .network
            .advertise_url
            .clone()
            .or_else(|| request_host.map(|host| format!("http://{}", host)))
    }

    /// Longest-valid-chain round against every registered peer.
    pub async fn sync_with_peers(&self) -> Result<bool, ChainError> {
        self.synchronizer
            .sync_with_peers(&self.ledger, self.peers.peers(), &self.client)
            .await
    }

    pub fn add_node(&self, address: &str, key: &str) -> Result<Peer, ChainError> {
        let (peer, inserted) = self.peers.add_node(address, key)?;
        if inserted {
            info!(peer = %peer.host, "registered peer");
        }
        Ok(peer)
    }

    /// Fetches each node's public key and registers it. Nodes that cannot be
    /// reached or are malformed are skipped.
    pub async fn register_nodes(&self, addresses: &[String]) -> Vec<Peer> {
        for address in addresses {
            let key = match self.client.fetch_public_key(address).await {
                Ok(key) => key,
                Err(e) => {
                    warn!(%address, "not registering peer: {}", ChainError::from(e));
                    continue;
                }
            };
            if let Err(e) = self.add_node(address, &key) {
                warn!(%address, "not registering peer: {}", e);
            }
        }
        self.peers.peers()
    }

    /// Committed transactions with amounts decoded and signatures checked
    /// against this node's key.
    pub async fn list_transactions(&self) -> Vec<TransactionView> {
        let public_key = self.keypair.public_key_bytes();
        let ledger = self.ledger.read().await;
        let codec = ledger.settings().codec;
        ledger
            .transactions()
            .map(|tx| codec.view(tx, &public_key))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use std::time::Duration;

    fn test_node() -> Node {
        let config = parse_config(
            r#"
            [miner]
            difficulty_prefix = "00"
            [network]
            request_timeout_secs = 1
            "#,
        )
        .unwrap();
        Node::init(config).unwrap()
    }

    #[tokio::test]
    async fn test_submit_and_mine_with_reward() {
        tokio::time::timeout(Duration::from_secs(30), async {
            let node = test_node();
            assert_eq!(node.submit_transaction("alice", "bob", "50").await.unwrap(), 1);

            let block = node.mine().await.unwrap();
            assert_eq!(block.index, 1);
            assert_eq!(block.transactions.len(), 2);
            assert_eq!(block.transactions[1].sender, "0");
            assert_eq!(block.transactions[1].recipient, node.identifier());

            assert_eq!(node.get_balance("alice").await, 50.0);
            assert_eq!(node.get_balance("bob").await, 150.0);
            assert_eq!(node.get_balance(node.identifier()).await, 105.0);
            assert_eq!(node.blocks_mined(), 1);

            let ledger = node.ledger.read().await;
            assert!(ledger.pending().is_empty());
            assert!(ledger.is_chain_valid(ledger.chain()));
        })
        .await
        .expect("test_submit_and_mine_with_reward timed out");
    }

    #[tokio::test]
    async fn test_mine_empty_block_without_reward() {
        tokio::time::timeout(Duration::from_secs(30), async {
            let node = test_node();
            let block = node.mine().await.unwrap();
            assert!(block.transactions.is_empty());
            assert!(node.balances().await.is_empty());
        })
        .await
        .expect("test_mine_empty_block_without_reward timed out");
    }

    #[tokio::test]
    async fn test_submit_rejections() {
        tokio::time::timeout(Duration::from_secs(30), async {
            let node = test_node();
            assert!(matches!(
                node.submit_transaction("", "bob", "1").await,
                Err(ChainError::MalformedRequest(_))
            ));
            assert!(matches!(
                node.submit_transaction("alice", "bob", "lots").await,
                Err(ChainError::MalformedRequest(_))
            ));
            assert!(matches!(
                node.submit_transaction("alice", "bob", "150").await,
                Err(ChainError::InsufficientFunds { .. })
            ));
            assert!(node.ledger.read().await.pending().is_empty());
        })
        .await
        .expect("test_submit_rejections timed out");
    }

    #[tokio::test]
    async fn test_list_transactions_decodes_and_verifies() {
        tokio::time::timeout(Duration::from_secs(30), async {
            let node = test_node();
            node.submit_transaction("alice", "bob", "20").await.unwrap();
            node.mine().await.unwrap();

            let views = node.list_transactions().await;
            assert_eq!(views.len(), 2);
            assert_eq!(views[0].amount, "20, verified: true");
            assert_eq!(views[1].amount, "2, verified: false");
        })
        .await
        .expect("test_list_transactions_decodes_and_verifies timed out");
    }

    #[tokio::test]
    async fn test_cancelled_mining_restores_pending() {
        tokio::time::timeout(Duration::from_secs(30), async {
            let node = test_node();
            node.submit_transaction("alice", "bob", "10").await.unwrap();
            node.shutdown().await;

            let err = node.mine().await.unwrap_err();
            assert!(matches!(err, ChainError::MiningAborted(_)));

            let ledger = node.ledger.read().await;
            assert_eq!(ledger.len(), 1);
            assert_eq!(ledger.pending().len(), 1);
            assert_eq!(ledger.pending()[0].sender, "alice");
            drop(ledger);
            assert_eq!(node.get_balance(node.identifier()).await, 0.0);
            assert_eq!(*node.state.read().await, NodeState::ShuttingDown);
        })
        .await
        .expect("test_cancelled_mining_restores_pending timed out");
    }

    #[tokio::test]
    async fn test_mining_after_replacement_uses_new_tip() {
        tokio::time::timeout(Duration::from_secs(30), async {
            let node = test_node();
            let mut remote = Ledger::new(node.config.ledger_settings().unwrap()).unwrap();
            for _ in 0..2 {
                let prev = remote.last_block().unwrap().hash().unwrap();
                let nonce = crate::miner::proof_of_work(
                    remote.len() as u64,
                    &prev,
                    remote.pending(),
                    &remote.settings().difficulty,
                )
                .unwrap();
                remote.append_block(nonce, prev);
            }

            assert!(node.ledger.write().await.replace_chain(remote.chain().to_vec()).unwrap());
            node.submit_transaction("alice", "bob", "10").await.unwrap();

            // the epoch is read with the tip, so the bump above must not cancel this search
            let block = node.mine().await.unwrap();
            assert_eq!(block.index, 3);
            assert_eq!(block.hash_of_previous_block, remote.chain()[2].hash().unwrap());
            assert_eq!(node.ledger.read().await.epoch(), 1);
        })
        .await
        .expect("test_mining_after_replacement_uses_new_tip timed out");
    }

    #[tokio::test]
    async fn test_advertised_url() {
        let node = test_node();
        assert_eq!(
            node.advertised_url(Some("127.0.0.1:5000")).as_deref(),
            Some("http://127.0.0.1:5000")
        );
        assert_eq!(node.advertised_url(None), None);
    }

    #[tokio::test]
    async fn test_broadcast_skips_dead_peers() {
        tokio::time::timeout(Duration::from_secs(30), async {
            let node = test_node();
            node.add_node("http://127.0.0.1:9", "k").unwrap();
            assert_eq!(node.broadcast("http://127.0.0.1:5000").await, 0);
            assert!(!node.sync_with_peers().await.unwrap());
        })
        .await
        .expect("test_broadcast_skips_dead_peers timed out");
    }
}

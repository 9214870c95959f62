//! Chain synchronization for railchain
//!
//! Implements the longest-valid-chain rule:
//! - fetch every known peer's chain (no ledger lock held)
//! - keep the strictly longest candidate that validates
//! - swap it in under the ledger's write lock, re-checking length there

use crate::blockchain::{validate_chain, Block, Ledger};
use crate::error::ChainError;
use crate::miner::Difficulty;
use crate::network::{ChainResponse, Peer, PeerClient, PeerError};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Sync state tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Syncing,
    Synced,
}

/// Sync statistics
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    pub rounds: u64,
    pub replacements: u64,
    pub peers_skipped: u64,
    pub candidates_rejected: u64,
    pub last_round: Option<Instant>,
}

/// Winning candidate of a sync round.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub peer: Peer,
    pub chain: Vec<Block>,
}

/// Tally of one selection pass, folded into [`SyncStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionReport {
    pub skipped: u64,
    pub rejected: u64,
}

/// Picks the strictly longest valid chain longer than `local_length`.
/// Unreachable peers and invalid chains are logged and passed over.
pub fn select_longest_valid<I>(
    local_length: usize,
    responses: I,
    difficulty: &Difficulty,
) -> (Option<Candidate>, SelectionReport)
where
    I: IntoIterator<Item = (Peer, Result<ChainResponse, PeerError>)>,
{
    let mut report = SelectionReport::default();
    let mut best: Option<Candidate> = None;
    let mut max_length = local_length;

    for (peer, response) in responses {
        let response = match response {
            Ok(response) => response,
            Err(e) => {
                warn!(peer = %peer.host, "skipping peer: {}", ChainError::from(e));
                report.skipped += 1;
                continue;
            }
        };

        if response.length <= max_length {
            debug!(peer = %peer.host, length = response.length, "peer chain is not longer");
            continue;
        }

        let checked = if response.chain.len() != response.length {
            Err(ChainError::InvalidChainCandidate(format!(
                "reported length {} but sent {} blocks",
                response.length,
                response.chain.len()
            )))
        } else {
            validate_chain(&response.chain, difficulty)
        };

        match checked {
            Ok(()) => {
                max_length = response.length;
                best = Some(Candidate {
                    peer,
                    chain: response.chain,
                });
            }
            Err(e) => {
                warn!(peer = %peer.host, "ignoring candidate chain: {}", e);
                report.rejected += 1;
            }
        }
    }

    (best, report)
}

/// Runs sync rounds against a ledger shared behind a `tokio` lock.
pub struct ChainSynchronizer {
    state: Arc<RwLock<SyncState>>,
    stats: Arc<RwLock<SyncStats>>,
}

impl ChainSynchronizer {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(SyncState::Idle)),
            stats: Arc::new(RwLock::new(SyncStats::default())),
        }
    }

    pub async fn get_sync_state(&self) -> SyncState {
        *self.state.read().await
    }

    pub async fn get_stats(&self) -> SyncStats {
        self.stats.read().await.clone()
    }

    /// Fetches every peer's chain, one after another.
    pub async fn fetch_candidates(
        &self,
        client: &PeerClient,
        peers: Vec<Peer>,
    ) -> Vec<(Peer, Result<ChainResponse, PeerError>)> {
        let mut responses = Vec::with_capacity(peers.len());
        for peer in peers {
            let response = client.fetch_chain(&peer).await;
            responses.push((peer, response));
        }
        responses
    }

    /// One sync round. Returns whether the local chain was replaced.
    pub async fn sync_with_peers(
        &self,
        ledger: &RwLock<Ledger>,
        peers: Vec<Peer>,
        client: &PeerClient,
    ) -> Result<bool, ChainError> {
        *self.state.write().await = SyncState::Syncing;

        let (local_length, difficulty) = {
            let ledger = ledger.read().await;
            (ledger.len(), ledger.settings().difficulty.clone())
        };

        let responses = self.fetch_candidates(client, peers).await;
        let (best, report) = select_longest_valid(local_length, responses, &difficulty);

        self.finish_round(ledger, best, report).await
    }

    /// Swaps in the round's winner, if any, and records the round. The state
    /// goes back to `Idle` when the ledger refuses the candidate.
    pub async fn finish_round(
        &self,
        ledger: &RwLock<Ledger>,
        best: Option<Candidate>,
        report: SelectionReport,
    ) -> Result<bool, ChainError> {
        let outcome = match best {
            Some(candidate) => {
                let length = candidate.chain.len();
                // local chain may have grown during the round trip
                let outcome = ledger.write().await.replace_chain(candidate.chain);
                match &outcome {
                    Ok(true) => info!(peer = %candidate.peer.host, length, "adopted longer peer chain"),
                    Ok(false) => {
                        info!(peer = %candidate.peer.host, length, "local chain caught up during sync, keeping it")
                    }
                    Err(e) => warn!(peer = %candidate.peer.host, "candidate chain refused: {}", e),
                }
                outcome
            }
            None => Ok(false),
        };
        let replaced = matches!(outcome, Ok(true));

        {
            let mut stats = self.stats.write().await;
            stats.rounds += 1;
            stats.peers_skipped += report.skipped;
            stats.candidates_rejected += report.rejected;
            if replaced {
                stats.replacements += 1;
            }
            stats.last_round = Some(Instant::now());
        }
        *self.state.write().await = if outcome.is_ok() {
            SyncState::Synced
        } else {
            SyncState::Idle
        };

        outcome
    }
}

impl Default for ChainSynchronizer {
    fn default() -> Self {
        Self::new()
    }
}

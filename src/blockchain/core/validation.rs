use crate::blockchain::core::chain::{genesis_hash, Block};
use crate::error::ChainError;
use crate::miner::{valid_proof, Difficulty};

/// Checks genesis anchoring, then hash linkage and proof-of-work of every
/// block against its predecessor. Stops at the first failure.
pub fn validate_chain(chain: &[Block], difficulty: &Difficulty) -> Result<(), ChainError> {
    let genesis = chain
        .first()
        .ok_or_else(|| ChainError::InvalidChainCandidate("chain is empty".to_string()))?;

    if genesis.index != 0 || genesis.hash_of_previous_block != genesis_hash() {
        return Err(ChainError::InvalidChainCandidate(
            "first block is not a genesis block".to_string(),
        ));
    }
    if !valid_proof(0, &genesis.hash_of_previous_block, &genesis.transactions, genesis.nonce, difficulty) {
        return Err(ChainError::InvalidChainCandidate(
            "genesis block fails proof-of-work".to_string(),
        ));
    }

    for (position, pair) in chain.windows(2).enumerate() {
        let (previous, block) = (&pair[0], &pair[1]);
        let index = position as u64 + 1;

        if block.index != index {
            return Err(ChainError::InvalidChainCandidate(format!(
                "block at position {} claims index {}",
                index, block.index
            )));
        }

        let expected = previous.hash()?;
        if block.hash_of_previous_block != expected {
            return Err(ChainError::InvalidChainCandidate(format!(
                "block {} links to {} but previous block hashes to {}",
                index, block.hash_of_previous_block, expected
            )));
        }

        if !valid_proof(index, &block.hash_of_previous_block, &block.transactions, block.nonce, difficulty) {
            return Err(ChainError::InvalidChainCandidate(format!(
                "block {} fails proof-of-work",
                index
            )));
        }
    }
    Ok(())
}

pub fn is_chain_valid(chain: &[Block], difficulty: &Difficulty) -> bool {
    validate_chain(chain, difficulty).is_ok()
}

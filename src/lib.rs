//! railchain - A minimal proof-of-work ledger node
//!
//! # Architecture
//!
//! ## Ledger
//! - [`blockchain`] - Blocks, balances, canonical hashing and chain validation
//! - [`transaction`] - Transaction wire format and amount codec
//!
//! ## Consensus & Mining
//! - [`miner`] - Proof-of-work search and miner rewards
//! - [`sync`] - Longest-valid-chain synchronization
//!
//! ## Cryptography
//! - [`crypto`] - Signatures and verification (secp256k1)
//!
//! ## Networking & Integration
//! - [`network`] - Peer registry and peer HTTP client
//! - [`node`] - Per-process node context
//! - [`api`] - REST API (feature `api`)
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Ledger
// ============================================================================
pub mod blockchain;
pub mod transaction;

// ============================================================================
// Consensus & Mining
// ============================================================================
pub mod miner;
pub mod sync;

// ============================================================================
// Cryptography
// ============================================================================
pub mod crypto;

// ============================================================================
// Networking & Integration
// ============================================================================
pub mod network;
pub mod node;

#[cfg(feature = "api")]
pub mod api;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;

//! Amount obfuscation and signing for the transaction wire format.
//!
//! The rail-fence transposition here is obfuscation only. It is reversible by
//! anyone who knows the (tiny) key space and gives no confidentiality.

use crate::crypto::{verify_base64, KeyPair};
use crate::error::ChainError;
use crate::transaction::types::{parse_amount, EncodedAmount, Transaction, TransactionView};

pub const DEFAULT_RAIL_FENCE_KEY: usize = 2;
pub const MAX_RAIL_FENCE_KEY: usize = 64;

/// Row of each character position along the zig-zag path.
fn rail_rows(len: usize, key: usize) -> Vec<usize> {
    let cycle = 2 * (key - 1);
    (0..len)
        .map(|i| {
            let r = i % cycle;
            if r < key {
                r
            } else {
                cycle - r
            }
        })
        .collect()
}

/// Writes `text` along a zig-zag over `key` rails and reads the rails top to
/// bottom. Keys below 2 leave the text unchanged.
pub fn rail_fence_encode(text: &str, key: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    // rails beyond the text length stay empty and do not change the output
    let key = key.min(chars.len());
    if key < 2 {
        return text.to_string();
    }
    let rows = rail_rows(chars.len(), key);

    let mut rails: Vec<String> = vec![String::new(); key];
    for (c, row) in chars.iter().zip(&rows) {
        rails[*row].push(*c);
    }
    rails.concat()
}

/// Inverse of [`rail_fence_encode`] for the same key.
pub fn rail_fence_decode(cipher: &str, key: usize) -> String {
    let chars: Vec<char> = cipher.chars().collect();
    let key = key.min(chars.len());
    if key < 2 {
        return cipher.to_string();
    }
    let rows = rail_rows(chars.len(), key);

    let mut lengths = vec![0usize; key];
    for row in &rows {
        lengths[*row] += 1;
    }

    // refill rails in reading order
    let mut rails: Vec<std::vec::IntoIter<char>> = Vec::with_capacity(key);
    let mut offset = 0;
    for len in lengths {
        rails.push(chars[offset..offset + len].to_vec().into_iter());
        offset += len;
    }

    rows.iter().filter_map(|row| rails[*row].next()).collect()
}

/// Encodes user-submitted amounts into `"<obfuscated>,<signature>"` and
/// decodes them back for balance bookkeeping and listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionCodec {
    key: usize,
}

impl Default for TransactionCodec {
    fn default() -> Self {
        Self::new(DEFAULT_RAIL_FENCE_KEY)
    }
}

impl TransactionCodec {
    pub fn new(key: usize) -> Self {
        TransactionCodec { key }
    }

    pub fn key(&self) -> usize {
        self.key
    }

    pub fn encode_amount(&self, plain: &str) -> String {
        rail_fence_encode(plain, self.key)
    }

    pub fn decode_amount(&self, obfuscated: &str) -> String {
        rail_fence_decode(obfuscated, self.key)
    }

    /// Builds the wire amount: the obfuscated text plus a signature over the plain text.
    pub fn seal(&self, plain: &str, keypair: &KeyPair) -> Result<String, ChainError> {
        let signature = keypair.sign_base64(plain)?;
        Ok(EncodedAmount {
            obfuscated: &self.encode_amount(plain),
            signature: Some(&signature),
        }
        .to_wire())
    }

    /// Recovers the plain amount text from a wire amount. Reward amounts have
    /// no signature part and are returned as-is.
    pub fn plain_text(&self, wire: &str) -> String {
        let encoded = EncodedAmount::parse(wire);
        match encoded.signature {
            Some(_) => self.decode_amount(encoded.obfuscated),
            None => encoded.obfuscated.to_string(),
        }
    }

    /// Numeric value of a wire amount.
    pub fn value(&self, wire: &str) -> Result<f64, ChainError> {
        parse_amount(&self.plain_text(wire))
    }

    /// Decodes a committed transaction and checks its signature against
    /// `public_key`. A missing or bad signature downgrades to `verified: false`.
    pub fn view(&self, tx: &Transaction, public_key: &[u8]) -> TransactionView {
        let encoded = tx.encoded_amount();
        let plain = self.plain_text(&tx.amount);
        let verified = match encoded.signature {
            Some(signature) => verify_base64(public_key, &plain, signature),
            None => false,
        };
        TransactionView::new(tx, &plain, verified)
    }
}

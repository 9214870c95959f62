//! Transaction module split into wire types and the amount codec

pub mod codec;
pub mod types;

pub use codec::{rail_fence_decode, rail_fence_encode, TransactionCodec};
pub use types::*;

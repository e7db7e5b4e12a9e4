//! Core types for Burrow.
//!
//! This module provides:
//! - Identifier newtypes (`PageId`, `FrameId`, `TxnId`, `Lsn`)
//! - The fixed-width on-page codec (`FixedCodec`) with the stock key and
//!   value types built on it (`Rid`, `GenericKey`)
//! - The opaque `Transaction` handle threaded through index operations

mod codec;
mod ids;
mod transaction;

pub use codec::{FixedCodec, GenericKey, Rid};
pub use ids::{FrameId, Lsn, PageId, TxnId};
pub use transaction::Transaction;

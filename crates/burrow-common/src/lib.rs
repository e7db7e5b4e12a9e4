//! # burrow-common
//!
//! Common types and constants for Burrow.
//!
//! This crate provides the foundational types shared by the Burrow storage
//! components:
//!
//! - **Types**: Core identifiers (`PageId`, `FrameId`, `TxnId`, `Lsn`), the
//!   fixed-width on-page codec, and the transaction handle
//! - **Constants**: Page geometry and directory limits
//!
//! ## Example
//!
//! ```rust
//! use burrow_common::types::{PageId, TxnId};
//!
//! let page_id = PageId::new(42);
//! let txn_id = TxnId::new(1);
//! assert!(page_id.is_valid());
//! assert!(txn_id.is_valid());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod constants;
pub mod types;

// Re-export commonly used items at the crate root
pub use constants::*;
pub use types::{FixedCodec, FrameId, GenericKey, Lsn, PageId, Rid, Transaction, TxnId};

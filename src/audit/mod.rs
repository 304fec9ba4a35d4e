//! Audit trail of proxied exchanges.
//!
//! # Data Flow
//! ```text
//! CapturingTransport (completed round trip)
//!     → Exchange (inbound headers, path, status, request/response bytes)
//!     → recorder.rs (detached task)
//!     → Transaction::from_exchange (fresh id + timestamp)
//!     → TransactionStore::insert_one
//! ```

pub mod recorder;
pub mod transaction;

pub use recorder::Recorder;
pub use transaction::{Encoding, Exchange, Transaction, API_KEY_HEADER, TEST_RUN_ID_HEADER};

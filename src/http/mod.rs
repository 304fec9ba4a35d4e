//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, proxy frontend)
//!     → director.rs (rewrite toward upstream, forwarding headers)
//!     → transport.rs (buffer, round trip, buffer, dispatch record)
//!     → Send to client
//! ```

pub mod director;
pub mod request;
pub mod server;
pub mod transport;

pub use director::{Director, DirectorError};
pub use request::{RequestId, X_REQUEST_ID};
pub use server::HttpServer;
pub use transport::{CapturingTransport, Outbound, TransportError};

//! Agent-to-agent (A2A) coordination.
//!
//! ```text
//! send_request ──► PendingTable.register ──► Transport.publish (retry/backoff)
//!                        │
//!      on_message ───────┤ Response/Error: remove entry, resolve waiter once
//!      sweeper    ───────┤ expired: remove entry, resolve Timeout
//!      cancel     ───────┘ remove entry, resolve Cancelled
//!
//! on_message(Request) ──► HandlerRegistry[(to_agent, kind)] ──► reply
//! ```

mod backoff;
mod coordinator;
mod error;
mod handler;
mod message;
mod pending;
mod sweeper;

pub use backoff::BackoffPolicy;
pub use coordinator::{A2aCoordinator, Disposition, ResponseHandle};
pub use error::{A2aError, MalformedMessage};
pub use handler::{Handler, HandlerError, HandlerRegistry, HandlerStats, RegisteredHandler, RequestContext};
pub use message::{AgentId, AgentMessage, MessageType, RequestKind};
pub use pending::{PendingRequest, PendingTable, RequestOutcome};
pub use sweeper::spawn_sweeper;

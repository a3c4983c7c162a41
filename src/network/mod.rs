//! Message bus adapters.
//!
//! ```text
//! ┌──────────────┐  publish(agent, frame)  ┌──────────────┐
//! │ A2A          │ ──────────────────────► │ Transport    │
//! │ Coordinator  │ ◄────────────────────── │ (memory/nats)│
//! └──────────────┘   inbox (mpsc<Bytes>)   └──────────────┘
//! ```
//!
//! Frames are JSON [`Envelope`]s.

mod envelope;
mod memory;
mod nats;
mod transport;

pub use envelope::{
    Envelope, EnvelopeMetadata, EventKind, IngestOp, APPLICATION_RECOMMENDED, ENVELOPE_VERSION,
};
pub use memory::InMemoryBus;
pub use nats::NatsTransport;
pub use transport::{Inbound, Transport, TransportError};

//! # agentsdk-events
//!
//! Watch event definitions and sequence tracking for the agent SDK.
//!
//! ## Design Principles
//!
//! - Events are ordered by a per-topic sequence id assigned by the server
//! - A consumer advances its sequence only after an event has been applied
//! - Delete events carry enough of the resource to locate it in a cache;
//!   every other event is followed by a fetch of the full resource
//!
//! ## Event Envelope
//!
//! Every event shares a common envelope with:
//! - Identity (`id`, `time`)
//! - Type (`CREATED`, `UPDATED`, `DELETED`, `SUBRESOURCEUPDATED`)
//! - Ordering (`metadata.sequenceID`) and origin (`metadata.watchTopicSelfLink`)
//! - The affected resource reference (`payload`)

mod envelope;
mod error;
mod sequence;

pub use envelope::*;
pub use error::EventError;
pub use sequence::{Sequence, SequenceProvider};

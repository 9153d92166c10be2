//! # agentsdk-resource
//!
//! Resource model for the agent SDK.
//!
//! Everything the agent caches or writes back to the control plane is a
//! [`ResourceInstance`]: a generic envelope (group, kind, name, metadata,
//! attributes, spec) plus named sub-resources such as `status`, `state` and
//! `x-agent-details`. Typed views over specific kinds live next to it:
//!
//! - [`KnownKind`]: the closed set of kinds the agent knows how to handle
//! - [`acl`]: access control list spec and the two environment ACLs
//! - [`credential`]: credential expiry, desired state and status level
//! - [`status`]: agent status values and the status report payload
//!
//! ## Invariants
//!
//! - Content hashes are computed over canonical JSON, so two resources with
//!   the same fields in a different key order hash identically
//! - Converting an unrecognized group/kind into a [`KnownKind`] is an error,
//!   never a silent fallthrough

pub mod acl;
pub mod credential;
mod error;
mod hash;
mod instance;
mod kind;
mod patch;
pub mod status;

pub use error::ResourceError;
pub use hash::{canonical_json, ContentHash};
pub use instance::*;
pub use kind::{GroupKind, KnownKind};
pub use patch::{Patch, PatchOp};
pub use status::AgentStatus;

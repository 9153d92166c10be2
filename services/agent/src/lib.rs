//! Agent SDK reconciliation engine.
//!
//! Keeps a local view of gateway/API resources in sync with the control
//! plane and drives side effects off that view.
//!
//! ## Architecture
//!
//! ```text
//! CatchUpSync ──seeds──▶ ResourceCache ◀──applies── EventListener ◀── EventSource
//!                              │                                        ▲
//!        ┌─────────────────────┼──────────────────┐          RetryingSupervisor
//!        ▼                     ▼                  ▼
//!  AclReconciler     CredentialExpiryJob   InstanceValidator
//!
//!  JobPool + HealthRegistry ──▶ StatusReporter ──▶ control plane
//! ```
//!
//! ## Modules
//!
//! - `cache`: concurrent resource cache with SQLite persistence
//! - `catchup`, `migrate`: full resynchronization and resource migrations
//! - `source`: replay client, event listener, poll and stream sources
//! - `supervisor`: restart with exponential backoff
//! - `acl`, `credentials`, `validator`: cache-driven write-side jobs
//! - `jobs`, `healthcheck`, `status`: scheduling and agent status

pub mod acl;
pub mod agent;
pub mod cache;
pub mod catchup;
pub mod client;
pub mod config;
pub mod context;
pub mod credentials;
pub mod error;
pub mod healthcheck;
pub mod jobs;
pub mod migrate;
pub mod source;
pub mod status;
pub mod supervisor;
pub mod sync;
pub mod validator;

pub use agent::{Agent, AgentBuilder};
pub use config::Config;
pub use context::AgentContext;
pub use error::{AgentError, Result};

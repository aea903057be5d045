//! Status, header assembly and query service core of an instrument personality.
//!
//! The crate is organised around one long-lived [`personality::Personality`] that
//! owns all shared state:
//!
//! - [`status`]: mutex-guarded status stores and the per-table status dictionaries
//! - [`header`]: header-definition tables, header assembly and FITS card encoding
//! - [`scheduler`]: cancellable periodic and background tasks
//! - [`server`]: the one-request-per-connection header query service
//! - [`dispatch`]: the named command registry used by the orchestration layer
//! - [`orchestrator`]: the boundary to the external orchestration layer
//! - [`exec`]: external actor command execution
//! - [`config`] and [`error`]: Figment settings and the crate error type

pub mod config;
pub mod dispatch;
pub mod error;
pub mod exec;
pub mod header;
pub mod orchestrator;
pub mod personality;
pub mod scheduler;
pub mod server;
pub mod status;
pub mod value;

pub use dispatch::{CommandDispatcher, CommandRequest, Reply};
pub use error::{AppResult, PersonalityError};
pub use personality::{Personality, PersonalityState};
pub use status::{StatusDictionary, StatusStore};
pub use value::{StatusMap, StatusValue};

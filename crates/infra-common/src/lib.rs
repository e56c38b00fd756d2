//! # callwatch-infra-common
//!
//! Shared plumbing for the callwatch crates:
//!
//! - [`logging`]: `tracing-subscriber` setup and component log contexts
//! - [`events`]: an event bus with a synchronous listener table and a
//!   broadcast channel for async observers
//! - [`timers`]: an arena of cancellable, keyed timer tasks
//! - [`errors`]: the infrastructure error type

pub mod errors;
pub mod events;
pub mod logging;
pub mod timers;

pub use errors::{Error, Result};
pub use events::{EventBus, ListenerId, NamedEvent};
pub use logging::{setup_logging, LogContext, LoggingConfig};
pub use timers::{TimerSet, TimerToken};

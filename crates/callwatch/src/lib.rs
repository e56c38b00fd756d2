//! # callwatch
//!
//! Real-time call-center supervision core.
//!
//! This crate ties the component crates together:
//!
//! - [`presence`]: agent presence with heartbeat liveness
//! - [`supervisor`]: live call monitoring, supervisor sessions, handoffs
//! - [`sla`]: queue SLA evaluation and breach history
//! - [`gateway`]: the framed client protocol and roster fan-out
//!
//! plus the process-scoped [`CoreContext`], layered configuration
//! ([`CallwatchConfig`]) and the persistence bridge.
//!
//! ```no_run
//! use callwatch::prelude::*;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let core = CoreContext::from_file("callwatch.toml")?;
//! setup_logging(core.config().logging.to_logging_config("callwatch")?).ok();
//!
//! let transport = Arc::new(ChannelTransport::new());
//! let gateway = core.gateway(transport.clone());
//! core.spawn_persistence(Arc::new(InMemoryStore::new()));
//!
//! let status = core.sla().evaluate(&QueueSnapshot::new("WQ-general"));
//! # let _ = (gateway, status);
//! core.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod persistence;
pub mod prelude;
pub mod settings;

pub use callwatch_infra_common as infra;
pub use callwatch_presence_core as presence;
pub use callwatch_presence_gateway as gateway;
pub use callwatch_sla_core as sla;
pub use callwatch_supervisor_core as supervisor;

pub use context::CoreContext;
pub use settings::{CallwatchConfig, ConfigError, LoggingSettings};

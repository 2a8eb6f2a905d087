//! HTTP surface and background machinery around the workflow engine:
//! configuration, live connector adapters, the axum server, the inbound
//! email dispatcher, the sweeper thread, and the chat tool loop.

mod config;
mod connectors;
mod inbound;
mod server;
mod state;
mod sweeper;
mod tools;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub use config::{ConfigError, ServiceConfig};
pub use connectors::build_collaborators;
pub use inbound::{InboundDispatcher, InboundEmail, InboundOutcome};
pub use server::run_server;
pub use sweeper::{start_sweeper, SweeperControl};
pub use tools::ChatTools;

//! Root of the `livecc-core` library: process sessions for compiling and
//! running small C programs on behalf of remote clients.

pub mod compiler;
pub mod config;
pub mod connection;
pub mod error;
pub mod exec;
pub mod platform;
pub mod pump;
pub mod reconcile;
pub mod registry;
pub mod sentinel;
pub mod service;
pub mod session;
pub mod store;
pub mod terminal;

pub use config::Config;
pub use config::ConfigOverrides;
pub use config::find_livecc_home;
pub use connection::ConnectionId;
pub use connection::Outbound;
pub use error::LiveccErr;
pub use service::RunService;
pub use store::BuildReport;
pub use store::SaveOutcome;
pub use store::SourceStore;

//! agtdash-client: IO boundary of the dashboard. HTTP requests with retry,
//! the Data Access Layer, the realtime channel driver, the stabilizer and
//! polling drivers, and the session that ties them together.

pub mod channel;
pub mod clock;
pub mod config;
pub mod data_access;
pub mod error;
pub mod executor;
pub mod poller;
pub mod session;
pub mod stabilizer;

pub use config::ClientConfig;
pub use session::{DashboardSession, DashboardSnapshot};

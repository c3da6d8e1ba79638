//! agtdash-core: pure state machines and data shapes for the dashboard
//! client. Nothing in this crate performs IO or reads a clock; callers pass
//! `now` explicitly.

pub mod backoff;
pub mod cache;
pub mod channel;
pub mod health;
pub mod message;
pub mod normalize;
pub mod outline;
pub mod output_log;
pub mod stabilizer;
pub mod types;

//! Library for the taskmgr client internals: the privileged bridge, wire decoders, metrics
//! derivation, process roster and kill workflow.

pub mod bridge;
pub mod config;
pub mod decode;
pub mod error;
pub mod history;
pub mod identity;
pub mod kill;
pub mod perf;
pub mod poll;
pub mod rate;
pub mod roster;
pub mod types;

pub use bridge::{Bridge, BridgeStatus, ConnectionState, KillReport, Request};
pub use config::Settings;
pub use types::{Category, ProcessSample};

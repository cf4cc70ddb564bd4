//! The zone-refresh engine: keeps secondary zones synchronized with their
//! primaries via periodic SOA polling and AXFR/IXFR transfer, independent
//! of any particular server or configuration-loader front end.

pub mod attempt;
pub mod axfr;
pub mod config;
pub mod controller;
pub mod error;
pub mod ixfr;
pub mod metrics;
pub mod requestor;
pub mod scheduler;
pub mod serial;
pub mod store;
pub mod timers;
pub mod types;
pub mod wire;

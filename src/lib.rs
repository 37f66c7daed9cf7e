pub mod codec;
pub mod config;
pub mod error;
pub mod key_provisioning;
pub mod link_probe;
pub mod matching;
pub mod net;
pub mod session;
pub mod sound_aggregator;
pub mod stats;
pub mod telemetry;

pub mod artifacts;
pub mod conductor_config;
pub mod config;
pub mod errors;
pub mod gates;
pub mod logging;
pub mod orchestrator;
pub mod phase;
pub mod session;

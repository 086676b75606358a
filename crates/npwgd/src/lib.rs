//! NexusPointWG daemon library.
//!
//! The binary in `main.rs` is a thin shell; settings handling and the
//! service factory live here so they can be tested.

pub mod service;
pub mod settings;

pub use service::Service;
pub use settings::Settings;

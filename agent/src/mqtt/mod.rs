//! MQTT control plane

pub mod bindings;
pub mod client;
pub mod control;
pub mod topics;

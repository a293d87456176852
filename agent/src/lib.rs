//! visagent library
//!
//! Vision inspection deployment runtime: runs a trained model over camera,
//! video, image or MQTT-pushed frames and reports results over MQTT and to
//! dated CSV logs.

pub mod app;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod hardware;
pub mod inference;
pub mod logs;
pub mod models;
pub mod mqtt;
pub mod source;
pub mod storage;
pub mod utils;
pub mod workers;

//! Deployment module

pub mod csv_log;
pub mod deployment;
pub mod formatter;
pub mod frames;
pub mod fsm;
pub mod label_check;
pub mod orchestrator;
pub mod recorder;
pub mod state;

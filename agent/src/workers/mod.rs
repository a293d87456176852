//! Background workers

pub mod mqtt;

//! Deployment core

pub mod build_log;
pub mod builder;
pub mod fsm;
pub mod gc;
pub mod identity;
pub mod lifecycle;
pub mod locks;
pub mod orchestrator;
pub mod ports;
pub mod tracker;

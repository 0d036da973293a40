pub mod config;
pub mod logging;

pub mod backend;
pub mod command;
pub mod control;
pub mod error;
pub mod job;
pub mod manager;
pub mod mode;
pub mod observer;
pub mod progress;
pub mod queue;

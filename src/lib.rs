pub mod adapter;
pub mod app;
pub mod cli;
pub mod clock;
pub mod config;
pub mod finalizer;
pub mod global;
pub mod join;
pub mod monitor;
pub mod orchestrator;
pub mod recorder;
pub mod session;
pub mod store;
pub mod watchdog;

#[cfg(test)]
mod testing;

pub mod aggregate;
pub mod app;
pub mod cli;
pub mod config;
pub mod extract;
pub mod fmt;
pub mod gate;
pub mod logging;
pub mod policy;
pub mod portal;
pub mod store;
pub mod utils;

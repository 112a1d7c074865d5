pub mod cli;
pub mod config;
pub mod feed;
pub mod runtime;

mod console;
mod events;
mod net;

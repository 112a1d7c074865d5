pub mod config;
pub mod controller;
pub mod decode;
pub mod device;
pub mod playback;
pub mod queue;
pub mod status;

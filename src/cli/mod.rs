pub mod config;
pub mod memory;
pub mod patterns;
pub mod status;

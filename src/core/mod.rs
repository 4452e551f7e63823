//! Core library components.

pub mod constants;
pub mod dotenv;
pub mod exec;
pub mod fs;
pub mod infra;
pub mod manifest;
pub mod secrets;
pub mod sops;

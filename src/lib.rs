//! pinstall - Install Python packages and keep requirements.txt in step

pub mod commands;
pub mod config;
pub mod error;
pub mod installer;
pub mod manifest;
pub mod models;

pub use error::{Error, Result};

pub mod config;
pub mod models;
pub mod quality;
pub mod stats;

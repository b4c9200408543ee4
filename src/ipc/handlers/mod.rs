pub mod comments;
pub mod config;
pub mod core;
pub mod export;
pub mod reports;
pub mod roster;
pub mod students;

pub mod backup_exchange;
pub mod core;
pub mod programs;
pub mod progress;
pub mod questions;
pub mod users;

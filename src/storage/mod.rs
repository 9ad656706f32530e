pub mod db;
mod maps;
mod missions;
pub mod models;
mod tables;
mod users;

pub use db::{Database, DatabaseError, PurgeStats};
pub use maps::ImageSwap;
pub use tables::*;

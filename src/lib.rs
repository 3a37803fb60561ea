pub mod config;
pub mod db;
pub mod errors;
pub mod release;
pub mod server;

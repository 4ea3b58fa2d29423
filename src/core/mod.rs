pub mod config;
pub mod credentials;
pub mod db;
pub mod errors;
pub mod logging;

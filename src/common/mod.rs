pub mod config;
pub mod db_instance;
pub mod exception;
pub mod logger;

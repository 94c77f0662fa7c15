pub mod config;
pub mod error;
pub mod identity;
pub mod models;
pub mod resource;
pub mod server;
pub mod storage;

pub mod config;
pub mod exchange;
pub mod logger;
pub mod paper_exchange;
pub mod rest_client;

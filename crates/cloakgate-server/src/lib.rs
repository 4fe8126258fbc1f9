pub mod app;
pub mod blacklist;
pub mod decision;
pub mod error;
pub mod ip_cache;
pub mod ip_extract;
pub mod ip_intel_client;
pub mod logger;
pub mod redirect_cache;
pub mod routes;
pub mod state;

// Library crate for integration tests and the binary.

pub mod client;
pub mod collections;
pub mod config;
pub mod encoder;
pub mod error;
pub mod history;
pub mod local_store;
pub mod log_capture;
pub mod model;
pub mod poller;
pub mod recent_urls;
pub mod result_store;
pub mod routes;
pub mod runs;
pub mod seo;
pub mod server;
pub mod state;
pub mod worker;

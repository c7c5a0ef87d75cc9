pub mod counter_store;
pub mod discovery;
pub mod http_client;

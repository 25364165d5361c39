pub mod assembler;
pub mod assistant;
pub mod config;
pub mod conversation;
pub mod decoder;
pub mod error;
pub mod http_client;
pub mod model;
pub mod normalizer;
pub mod source;
pub mod store;
pub mod stream;
pub mod telemetry;
pub mod transcript;
#[cfg(test)]
pub mod test_util;

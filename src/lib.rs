pub mod config;
pub mod domain;
pub mod error;
pub mod gbif;
pub mod pipeline;
pub mod resolve;
pub mod store;
pub mod taxonomy;

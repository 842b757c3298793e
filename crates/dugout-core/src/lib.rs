// Shared infrastructure: configuration and the document store.

pub mod config;
pub mod store;

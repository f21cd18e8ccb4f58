pub mod activity;
pub mod app;
pub mod config;
pub mod cursor;
pub mod descriptor;
pub mod domain;
pub mod error;
pub mod filter;
pub mod fingerprint;
pub mod listing;
pub mod output;
pub mod pipeline;
pub mod query;
pub mod registration;
pub mod resolver;
pub mod schema;
pub mod sort;
pub mod store;
pub mod typecode;

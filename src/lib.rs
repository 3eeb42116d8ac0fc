pub mod app;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod download;
pub mod error;
pub mod graph;
pub mod http;
pub mod output;
pub mod resolver;
pub mod sparql;
pub mod vault;

pub mod config;
pub mod error;
pub mod export;
pub mod freshness;
pub mod index;
pub mod link_graph;
pub mod markup;
pub mod provider;
pub mod remote;
pub mod render;
pub mod sanitize;
pub mod scheduler;
pub mod sync;

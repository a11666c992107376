pub mod config;
pub mod constants;
pub mod error;
pub mod host;
pub mod lifecycle;
pub mod registry;
pub mod save_codec;
pub mod save_store;
pub mod selection;
pub mod tracker;
pub mod types;

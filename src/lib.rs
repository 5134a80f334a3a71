pub mod commands;
pub mod dataset;
pub mod entity;
pub mod manifest;
pub mod runtime;
pub mod store;

pub mod adapter;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod fixtures;
pub mod service;

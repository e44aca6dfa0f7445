pub mod add;
pub mod auth_cmd;
pub mod clear;
pub mod common;
pub mod completions;
pub mod config;
pub mod list;
pub mod sync;

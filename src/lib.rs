//! IdeaHub guard
//!
//! Security and observability request pipeline for the IdeaHub server.

pub mod api;
pub mod config;
pub mod core;
pub mod models;
pub mod utils;

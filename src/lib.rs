pub mod analysis;
pub mod api;
pub mod app;
pub mod cli;
pub mod config;
pub mod db;
pub mod gateway;
pub mod global;
pub mod idempotency;
pub mod meeting;
pub mod reconciler;
pub mod scheduler;
pub mod service;
pub mod webhook;

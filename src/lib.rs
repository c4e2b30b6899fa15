/// Content-addressed media storage for a content-management application
///
/// Identical uploads are stored once and shared between media records
/// through a reference count. The last release reclaims the file.

pub mod activity;
pub mod api;
pub mod auth;
pub mod blob_store;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod jobs;
pub mod media;
pub mod metrics;
pub mod server;

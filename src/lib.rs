// Library exports for picstream
// This allows integration tests and external code to use picstream modules

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod media;
pub mod routes;
pub mod state;

pub mod auth;
pub mod config;
pub mod error;
pub mod extractor;
pub mod payments;
pub mod plans;
pub mod processing;
pub mod routes;
pub mod subscription;
pub mod tools;
pub mod transactions;

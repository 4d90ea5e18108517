//! API handlers for the directory access-control service.

pub mod auth;
pub mod health;

//! Route definitions for the ScanForge API.

pub mod auth;
pub mod health;
pub mod scans;

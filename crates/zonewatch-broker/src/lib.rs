//! zonewatch Broker Library
//!
//! Core functionality for the zonewatch broker daemon:
//! - JSON-RPC surface over a single HTTP endpoint
//! - Durable job store across SQLite, PostgreSQL, and MySQL
//! - Claim contract for external test agents
//! - Boundary to the external DNS testing engine

pub mod auth;
pub mod engine;
pub mod server;
pub mod storage;

/// Campaign analytics
pub mod analytics;
/// Basic application code
pub mod app;
/// REST clients for outside services
pub mod client;
/// Time and randomness sources
pub mod clock;
/// Controllers for REST endpoints
pub mod controller;
/// Cryptography-related objects
pub mod crypto;
/// Delivery worker
pub mod delivery;
/// Domain objects
pub mod domain;
/// Error enums
pub mod error;
/// Periodic job guard
pub mod job;
/// Outreach data model
pub mod model;
/// Repositories
pub mod repo;
/// Outreach scheduler
pub mod scheduler;
/// Application settings
pub mod settings;
/// Application telemetry for tracing and logging
pub mod telemetry;
/// Engagement tracking
pub mod tracking;

//! linkreply domain crate
//!
//! This crate contains the auto-reply rule engine following hexagonal architecture:
//! - `model`: Domain entities and value objects
//! - `ports`: Trait definitions for external dependencies (adapters)
//! - `engine`: Pure trigger matching, template rendering and rule evaluation
//! - `usecases`: Ingestion and dispatch built on top of the engine

pub mod engine;
pub mod model;
pub mod ports;
pub mod usecases;

pub use model::*;
pub use ports::*;

//! # Engine module
//!
//! Internal implementation of the entity storage and execution engine.
//!
//! This module contains all core building blocks:
//! - Archetypes and chunked column storage
//! - Entity index and handle management
//! - Query matching and iteration
//! - Deferred commands, observers, and signals
//! - Processor scheduling
//!
//! Public API exposure is controlled by `lib.rs`.

pub mod types;
pub mod error;
pub mod fragment;
pub mod chunk;
pub mod entity;
pub mod shared;
pub mod archetype;
pub mod manager;
pub mod query;
pub mod commands;
pub mod observer;
pub mod signal;
pub mod resource;
pub mod processor;
pub mod schedule;

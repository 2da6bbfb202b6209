//! Business logic and repository trait definitions for Loomwork.
//!
//! This crate defines the "ports" (repository traits) that the infrastructure
//! layer implements. It depends only on `loomwork-types` -- never on
//! `loomwork-infra` or any database/IO crate.

pub mod event;
pub mod repository;
pub mod workflow;

//! HTTP request handlers for the REST API.

pub mod approval;
pub mod workflow;

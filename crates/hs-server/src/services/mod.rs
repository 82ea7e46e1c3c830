//! Relay services: request normalization and event fan-out.

pub mod broadcast;
pub mod normalizer;

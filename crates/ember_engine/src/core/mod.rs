//! Core engine types
//!
//! Configuration for every subsystem lives here.

pub mod config;

pub use config::{ApplicationConfig, AssetConfig, BackendKind, EngineConfig, JobConfig, RendererConfig};

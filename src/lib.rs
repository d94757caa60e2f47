//! Modloader - a plugin registry with dependency-resolved module loading
//!
//! This library discovers plugins compiled into the host or shipped as shared
//! libraries, loads them in dependency order with reference-counted lifetimes,
//! and exposes the interfaces and type info they register.
//!
//! # Modules
//!
//! - [`plugins`]: Discovery, dependency resolution and the [`PluginRegistry`]
//! - [`registry`]: Interface type and type info registries
//! - [`config`]: Configuration management and serialization
//! - [`error`]: Error types
//!
//! [`PluginRegistry`]: plugins::PluginRegistry

pub mod config;
pub mod error;
pub mod plugins;
pub mod registry;

pub use error::{RegistryError, Result};
pub use plugins::{PluginDescriptor, PluginId, PluginRegistry};

#![doc = "tooci-core: core logic library for tooci."]

//! Mirrors Helm chart repositories, version by version, into an OCI registry.
//!
//! The pipeline is: [`inventory::Inventory`] (from `repos.yaml`) →
//! [`repository::Repository`] (policy + catalog) → [`version::ChartVersion::process`]
//! (fetch → transform → push → record), driven concurrently by [`synchronise`].
//! External commands go through [`gateway::ToolGateway`], which tests replace with mocks.

pub mod chart;
pub mod ci;
pub mod config;
pub mod error;
pub mod gateway;
pub mod helm;
pub mod inventory;
pub mod record;
pub mod registry;
pub mod repository;
pub mod synchronise;
pub mod transform;
pub mod version;

pub use error::{ErrorKind, MirrorError, Result};

#![doc = "cronohub-core: plugin contracts, fetch engine and run orchestration for cronohub."]

//! This crate contains the archival pipeline itself: the source/target plugin
//! contracts, plugin resolution, the bounded concurrent fetch engine and the
//! orchestrator that ties a run together. Concrete backends live in the
//! `cronohub` binary crate and plug in through [`registry::PluginRegistry`].
//!
//! # Usage
//! Register plugin factories on a [`registry::PluginRegistry`], build a
//! [`contract::PluginContext`], then call [`orchestrator::Orchestrator::run`].

pub mod contract;
pub mod error;
pub mod external;
pub mod fetch;
pub mod filter;
pub mod listing;
pub mod orchestrator;
pub mod registry;
pub mod retry;

//! hemabridge-core - Blood-cancer risk triage domain library
//!
//! This crate holds everything the HemaBridge server needs that is not HTTP:
//! the cell-type vocabulary, the risk classifier and its recommendation table,
//! batch aggregation, the boundary to the external image classifier, the chat
//! assistant, PDF report rendering, credentials and bearer tokens, the
//! authorization policy, and `SQLite` persistence.
//!
//! # Modules
//!
//! - [`cell`]: Fixed five-label cell vocabulary and percentage maps
//! - [`risk`]: Threshold rule mapping percentages to a [`risk::RiskTier`]
//! - [`recommendations`]: Static per-tier recommendation lists
//! - [`aggregate`]: Averaging of per-image maps for batch submissions
//! - [`model`]: [`model::ModelHandler`] and the [`model::CellClassifier`] seam
//! - [`chat`]: Keyword/TF-IDF assistant with emergency override
//! - [`report`]: PDF rendering of stored analyses
//! - [`auth`]: Password hashing, token issuance, login throttling
//! - [`policy`]: Role/action authorization decisions
//! - [`store`]: `SQLite`-backed users, analyses, appointments, chat logs
//! - [`config`]: TOML configuration

pub mod aggregate;
pub mod auth;
pub mod cell;
pub mod chat;
pub mod config;
pub mod model;
pub mod policy;
pub mod recommendations;
pub mod report;
pub mod risk;
pub mod store;

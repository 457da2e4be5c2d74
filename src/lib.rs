//! ModSync - keeps locally installed mods in sync with Nexus Mods
//!
//! This crate provides:
//! - Metadata refresh when the Nexus identity of an installed mod changes
//! - Update checks, endorsements and downloads through the Nexus Mods API
//! - `nxm://` link handling and desktop association
//! - Mappings between local game ids and Nexus catalog ids

pub mod app;
pub mod config;
pub mod controller;
pub mod db;
pub mod debounce;
pub mod games;
pub mod mods;
pub mod nexus;
pub mod state;

pub use app::App;
pub use config::Config;

//! Tuber Core - data model shared by the Tuber crates
//!
//! - `App`: one managed application and its release state
//! - `State` / `ManagedResource`: the last two released resource sets
//! - `AppYamls`: raw manifest groups for an image digest
//! - `TuberConfig`: file-backed configuration

pub mod app;
pub mod config;
pub mod error;
pub mod state;

pub use app::{App, AppYamls, ClusterData, ResourceRef};
pub use config::{
    ClusterClientConfig, MonitorConfig, ReleaseTimings, SlackConfig, StoreConfig, TuberConfig,
};
pub use error::{CoreError, Result};
pub use state::{ManagedResource, State};

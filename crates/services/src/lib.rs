#![forbid(unsafe_code)]

pub mod app_services;
pub mod change_watcher;
pub mod config;
pub mod error;
pub mod save_scheduler;
pub mod sync_service;

pub use tracker_core::Clock;

pub use app_services::{AppServices, shared_remote};
pub use change_watcher::{ChangeWatcher, watch_changes};
pub use config::{SchedulerConfig, SyncConfig};
pub use error::ServicesError;
pub use save_scheduler::{SaveScheduler, SchedulerState};
pub use sync_service::{
    CatalogDiff, Connectivity, LoadSource, Loaded, PushReport, SaveOutcome, SyncService,
    build_tree, merge_overlay,
};

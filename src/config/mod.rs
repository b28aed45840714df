// src/config/mod.rs
pub mod app;
pub mod pull_events;

pub use app::{load_default, load_from, AppConfig};
pub use pull_events::{BoundingBox, PullEventsConfig, QualityGrade, RawPullEventsConfig};

pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod requests;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;

pub use adapters::{LocalStorage, MediaWikiClient};
pub use config::toml_config::BotConfig;
pub use crate::core::{
    directory::Directory,
    run::{NotificationRun, RunSummary},
    sampler::{SamplingPolicy, WeightedSampler},
};
pub use utils::error::{BotError, Result};

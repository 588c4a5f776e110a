#![warn(clippy::pedantic)]
#![allow(clippy::missing_docs_in_private_items)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]

pub mod app;
pub mod cache;
pub mod checker;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod events;
pub mod ipc;
pub mod lifecycle;
pub mod orchestrator;
pub mod repos;
pub mod scheduler;
pub mod services;
pub mod sites;
pub mod storage;
pub mod utils;

pub use app::App;
pub use config::CoreConfig;
pub use utils::error::{Result, WatcherError};

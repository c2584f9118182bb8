#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

//! Shared ledger synchronization core
//!
//! Keeps the device-local store and the remote document store consistent for
//! cards, operations, bills and recurring series, including records shared
//! with a small group of other users.

pub mod config;
pub mod domain;
pub mod infra;
pub mod service;

pub use config::{AppConfig, SyncConfig};
pub use infra::logging::init_logging;
pub use service::sync::{Error, SyncDeps, SyncService};

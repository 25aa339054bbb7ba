//! # Armory - File-Backed Game Content Registry
//!
//! Armory manages a collection of user-editable named records — game items
//! and groups of items — persisted as one JSON document per record. The
//! registry is the single source of truth for in-process content, and the
//! persistence layer keeps it safe against partial writes, power loss,
//! concurrent access from another process, and operators hand-editing the
//! backing files while the process runs.
//!
//! ## Features
//!
//! - **Dual-Keyed Registry**: Records resolve by legacy id, synthetic uid,
//!   or name, with uniqueness enforced across both record kinds.
//! - **Advisory File Locking**: Per-file locks against other processes,
//!   probed once at startup and degraded gracefully when unsupported.
//! - **Crash-Safe Saves**: Backup-before-overwrite, write, re-parse verify,
//!   and automatic rollback to the last known-good content.
//! - **Operator Edit Sessions**: Unlock a record's file for an external
//!   editor, then reload it — with checksum-verified recovery if the edit
//!   broke the document.
//! - **Legacy Migration**: A single aggregate store is migrated once into
//!   the one-file-per-record layout, with the original moved aside.
//! - **Power Schemas**: Declared field lists validate the effects items
//!   reference, with unknown powers reported as missing dependencies.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use armory::config::Config;
//! use armory::RecordStore;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml")?;
//!     let mut store = RecordStore::open(&config.registry)?;
//!
//!     let report = store.load_all();
//!     println!("loaded {} records", report.loaded.len());
//!
//!     store.new_item("sword")?;
//!     store.save("sword")?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`registry`] - Indices, locking, persistence, and edit sessions
//! - [`config`] - Configuration management and validation
//! - [`validation`] - Record name validation and safe filenames
//! - [`logutil`] - Log sanitization helpers
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │  Operator CLI    │ ← command layer (src/main.rs)
//! └──────────────────┘
//!          │
//! ┌──────────────────┐
//! │  RecordStore     │ ← registry indices + edit sessions
//! └──────────────────┘
//!          │
//! ┌──────────────────┐
//! │  Persistence &   │ ← load/save/verify/rollback,
//! │  Lock Manager    │   advisory file locks
//! └──────────────────┘
//! ```

pub mod config;
pub mod logutil;
pub mod registry;
pub mod validation;

pub use registry::errors::RegistryError;
pub use registry::persist::{LoadReport, Loaded, SaveReport};
pub use registry::powers::{FieldSpec, FieldType, PowerCatalog, PowerSpec};
pub use registry::session::ReloadOutcome;
pub use registry::types::{GroupRecord, ItemRecord, PowerEntry, Quality, Record, RecordKind};
pub use registry::{RecordStore, RecordStoreBuilder};

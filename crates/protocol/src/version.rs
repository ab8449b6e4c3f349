//! Protocol versioning for daemon IPC communication.
//!
//! # Breaking Changes (require PROTOCOL_VERSION bump)
//!
//! - Removing fields from request/response types
//! - Changing field types
//! - Renaming fields without `#[serde(alias)]`
//! - Removing enum variants
//!
//! # Non-Breaking Changes (safe without version bump)
//!
//! - Adding new optional fields with `#[serde(default)]`
//! - Adding new request/response variants
//! - Adding new enum variants
//!
//! The current build supports communication one version back: bump
//! `PROTOCOL_VERSION` for breaking changes and keep
//! `MIN_SUPPORTED_VERSION` at N-1 until the old version is dropped.

/// Current protocol version. Bump when making breaking changes.
pub const PROTOCOL_VERSION: u32 = 1;

/// Minimum protocol version this build can communicate with.
pub const MIN_SUPPORTED_VERSION: u32 = 1;

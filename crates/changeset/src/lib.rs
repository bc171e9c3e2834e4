//! # Changeset
//!
//! Maps a revision range to the infrastructure services it affects.
//!
//! Detection runs in two stages:
//!
//! 1. [`detect`] asks a [`VersionControl`] backend for the changed files and
//!    keeps the services whose directory sits directly under the
//!    configuration root.
//! 2. [`expand`] adds services whose definition files reference a changed
//!    shared module.
//!
//! The result is an immutable [`ChangeSet`].
//!
//! ## Example
//!
//! ```ignore
//! use changeset::{GitCli, detect, discover_modules, discover_services, expand};
//!
//! let git = GitCli::discover(&config_root)?;
//! let services = discover_services(&config_root, &dependency_map)?;
//! let registry = discover_modules(&git.repo_root().join("modules"))?;
//!
//! let detected = detect(&git, "origin/main", "HEAD", "toronto", &services)?;
//! let changes = expand(detected, "modules", &registry, &services);
//! println!("{:?}", changes.service_list());
//! ```

pub mod detector;
pub mod discovery;
pub mod error;
pub mod impact;
pub mod vcs;

pub use detector::{DetectedChanges, detect, repo_relative, service_segment};
pub use discovery::{DEFINITION_EXTENSION, definition_files, discover_modules, discover_services};
pub use error::{Error, ReferenceError, Result};
pub use impact::{ChangeSet, changed_modules, expand};
pub use vcs::{ChangedFilesList, GitCli, VersionControl};

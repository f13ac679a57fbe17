//! # NTFS user mapping for Rust
//!
//! Builds the `UserMapping` file through which ntfs-3g translates the Windows
//! owners of NTFS files into Unix users and groups.
//!
//! The crate provides:
//! - [`SecurityIdentifier`]: an owned SID, decoded once from the bytes found
//!   in a security descriptor.
//! - [`MappingTable`]: the ordered, deduplicated SID to uid/gid table.
//! - [`Ingestor`] and [`DirectoryWalker`]: collection of the owners, groups and
//!   ACL principals of the profile and top-level directories of a volume.
//! - [`sanitize()`]: the pass guaranteeing at least one user and one group.
//! - [`MappingWriter`]: the writer of the mapping file, with backup and
//!   fallback location.
//! - [`Usermap`]: all of the above, volume after volume.
//!
//! ## Overview
//! - **Volumes** are reached through the [`SecurityApi`] /
//!   [`VolumeSession`] pair: the Win32 security API on Windows, the
//!   `system.ntfs_acl` attribute of ntfs-3g mounts on Linux, or an in-memory
//!   tree ([`volume::memory`]).
//! - **Operators** answer through a [`ResolutionPrompter`]. Without one the
//!   run is unattended: new identifiers stay undecided.
//! - Only local and domain account identifiers (`S-1-5-21-...`) are mapped.
//!
//! ## Examples
//! ```rust
//! use std::path::PathBuf;
//! use ntfs_usermap::volume::memory::{MemoryApi, MemoryFile, MemoryVolume};
//! use ntfs_usermap::{ScriptedPrompter, SecurityIdentifier, Usermap, UsermapConfig};
//!
//! let alice: SecurityIdentifier = "S-1-5-21-1-2-3-1001".parse().unwrap();
//! let volume = MemoryVolume::new()
//!     .with("Users", MemoryFile::directory())
//!     .with("Users/alice", MemoryFile::directory().owner(alice));
//! let api = MemoryApi::new().with_volume("C:", volume);
//!
//! let out = tempfile::tempdir().unwrap();
//! let mut prompter = ScriptedPrompter::new(["1000"]);
//! let report = Usermap::new(api, UsermapConfig::default())
//!     .run(&[PathBuf::from("C:")], out.path(), Some(&mut prompter))
//!     .unwrap();
//!
//! let text = std::fs::read_to_string(&report.outcome.path).unwrap();
//! assert!(text.ends_with(":1000:S-1-5-21-1-2-3-513\n1000:1000:S-1-5-21-1-2-3-1001\n"));
//! ```

#![warn(missing_docs)]

mod config;
mod error;
mod ingest;
mod mapping;
mod pipeline;
mod prompt;
mod sanitize;
mod serialize;
mod sid;
pub mod volume;
mod walk;

pub use config::UsermapConfig;
pub use error::{ConfigError, Error, Result};
pub use ingest::Ingestor;
pub use mapping::{MappingRecord, MappingTable, RecordId};
pub use pipeline::{RunReport, Usermap, VolumeReport};
pub use prompt::{
    ConsolePrompter, MappingRequest, ResolutionPrompter, Role, ScriptedPrompter, ask_validated,
    is_rejected,
};
pub use sanitize::{SanitizeReport, StandardGroup, sanitize};
pub use serialize::{MappingWriter, Rendered, WriteOutcome, render, render_minimal};
pub use sid::{
    InvalidSidFormat, MAX_DECODED_SUB_AUTHORITIES, SecurityIdentifier, SidComponents, decode,
    derive_group_identifier, is_generic_group,
};
pub use volume::{
    DefaultIdentity, DirEntry, DomainAndName, SecurityApi, SessionGuard, VolumeSession,
};
pub use walk::{DirectoryWalker, ScanStats};

/// Security descriptor decoding, re-exported from the parsing crate.
pub use parsing::{
    Acl, AclPrincipals, DescriptorKind, InvalidDescriptor, SecurityDescriptor,
    SecurityDescriptorBuilder,
};

use std::io;
use std::path::PathBuf;

use parsing::{DescriptorKind, InvalidDescriptor, InvalidSidFormat};
use thiserror::Error;

/// Errors raised while building a user mapping.
///
/// Only [`Error::CollaboratorUnavailable`] lets a run go on (with the next
/// volume). [`Error::DescriptorUnavailable`], [`Error::InvalidSid`] and
/// [`Error::InvalidDescriptor`] are logged and skipped by the walker,
/// [`Error::BackupFailure`] is logged by the writer.
#[derive(Debug, Error)]
pub enum Error {
    /// A session could not be opened on a volume.
    #[error("could not open volume \"{}\"", volume.display())]
    CollaboratorUnavailable {
        /// Volume that was requested.
        volume: PathBuf,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },

    /// A descriptor could not be read for a file.
    #[error("no {kind} descriptor for \"{}\"", path.display())]
    DescriptorUnavailable {
        /// File within the volume.
        path: PathBuf,
        /// Requested part of the descriptor.
        kind: DescriptorKind,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },

    /// No file owner was mapped and no default account could stand in.
    #[error("no file owner has been mapped, no mapping can be built")]
    NoOwnerResolved,

    /// The mapping file could be written neither in its directory nor at the
    /// volume root.
    #[error(
        "could not create mapping file \"{}\" nor \"{}\"",
        primary.display(),
        fallback.display()
    )]
    WriteFailure {
        /// Preferred location.
        primary: PathBuf,
        /// Root-level location tried next.
        fallback: PathBuf,
        /// Failure of the last attempt.
        #[source]
        source: io::Error,
    },

    /// An existing mapping file could not be renamed out of the way.
    #[error("could not back up \"{}\"", path.display())]
    BackupFailure {
        /// Existing mapping file.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },

    /// The operator prompt failed.
    #[error("prompt failed")]
    Prompt(#[source] io::Error),

    /// The configuration file could not be read or parsed.
    #[error("invalid configuration \"{}\"", path.display())]
    Config {
        /// Configuration file.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: ConfigError,
    },

    /// A binary SID was malformed.
    #[error(transparent)]
    InvalidSid(#[from] InvalidSidFormat),

    /// A security descriptor was malformed.
    #[error(transparent)]
    InvalidDescriptor(#[from] InvalidDescriptor),
}

/// Why a configuration file was rejected.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// The file is not valid TOML for [`crate::UsermapConfig`].
    #[error(transparent)]
    Parse(#[from] toml::de::Error),
}

impl Error {
    /// Whether the error must stop the whole run rather than the current file.
    #[inline]
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::DescriptorUnavailable { .. }
                | Self::InvalidSid(_)
                | Self::InvalidDescriptor(_)
                | Self::BackupFailure { .. }
        )
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = core::result::Result<T, E>;

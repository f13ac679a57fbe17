//! Access to the files and security descriptors of a volume.
//!
//! A [`SecurityApi`] opens one [`VolumeSession`] per volume. The pipeline
//! holds it in a [`SessionGuard`] so the session is released whichever way a
//! scan ends.

use core::fmt::{self, Display};
use std::io;
use std::path::{Path, PathBuf};

use delegate::delegate;
use parsing::DescriptorKind;
use tracing::{info, warn};

use crate::sid::SecurityIdentifier;

pub mod memory;

cfg_if::cfg_if! {
    if #[cfg(windows)] {
        mod windows;
        pub use self::windows::WindowsApi;
        /// Backend of the platform the binary runs on.
        pub type HostApi = WindowsApi;
    } else if #[cfg(target_os = "linux")] {
        mod ntfs3g;
        pub use self::ntfs3g::Ntfs3gApi;
        /// Backend of the platform the binary runs on.
        pub type HostApi = Ntfs3gApi;
    }
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DirEntry {
    /// File name, without its directory.
    pub name: String,
    /// Whether the entry is a directory.
    pub is_directory: bool,
    /// DOS alias, reparse point, junction or symbolic link: never scanned.
    pub is_special: bool,
}

impl DirEntry {
    /// A plain directory entry.
    #[inline]
    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_directory: true,
            is_special: false,
        }
    }

    /// A plain file entry.
    #[inline]
    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_directory: false,
            is_special: false,
        }
    }
}

/// Account name qualified by its domain, shown as `DOMAIN\name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct DomainAndName {
    /// Domain, or machine name for local accounts.
    pub domain: String,
    /// Account name within the domain.
    pub name: String,
}

impl DomainAndName {
    /// Builds the pair.
    #[inline]
    pub fn new<D: Into<String>, N: Into<String>>(domain: D, name: N) -> Self {
        Self {
            domain: domain.into(),
            name: name.into(),
        }
    }
}

impl Display for DomainAndName {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\\{}", self.domain, self.name)
    }
}

/// Account the tool runs under, offered as default owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultIdentity {
    /// Its identifier.
    pub sid: SecurityIdentifier,
    /// Its name and domain.
    pub account: DomainAndName,
}

/// An open volume.
///
/// Paths are relative to the volume root; the empty path is the root itself.
pub trait VolumeSession {
    /// Lists a directory, `.` and `..` included when the platform reports them.
    ///
    /// # Errors
    /// Any failure to read the directory.
    fn list_entries(&self, path: &Path) -> io::Result<Vec<DirEntry>>;

    /// Fetches the requested part of a file's security descriptor, in
    /// self-relative form. `Ok(None)` means the file has none.
    ///
    /// # Errors
    /// Any failure to query the file.
    fn security_descriptor(&self, path: &Path, kind: DescriptorKind)
    -> io::Result<Option<Vec<u8>>>;
}

/// Capability to open volumes and to read security descriptors.
pub trait SecurityApi {
    /// Session type produced by [`SecurityApi::open_session`].
    type Session: VolumeSession;

    /// Opens `volume` (a drive root or a mount point).
    ///
    /// # Errors
    /// The volume does not exist or does not expose security descriptors.
    fn open_session(&self, volume: &Path) -> io::Result<Self::Session>;

    /// Releases a session. Called exactly once per opened session.
    ///
    /// # Errors
    /// Any failure reported by the platform.
    #[inline]
    fn close_session(&self, _session: &mut Self::Session) -> io::Result<()> {
        Ok(())
    }

    /// The account the tool runs under, when the platform knows it.
    #[inline]
    fn default_identity(&self) -> Option<DefaultIdentity> {
        None
    }
}

/// Scoped session: closed on [`SessionGuard::close`] or when dropped.
pub struct SessionGuard<'a, A: SecurityApi + ?Sized> {
    api: &'a A,
    session: A::Session,
    volume: PathBuf,
    closed: bool,
}

impl<'a, A: SecurityApi + ?Sized> SessionGuard<'a, A> {
    /// Opens `volume` through `api`.
    ///
    /// # Errors
    /// See [`SecurityApi::open_session`].
    pub fn open(api: &'a A, volume: &Path) -> io::Result<Self> {
        let session = api.open_session(volume)?;
        info!(volume = %volume.display(), "volume opened");
        Ok(Self {
            api,
            session,
            volume: volume.to_path_buf(),
            closed: false,
        })
    }

    /// Volume this session was opened on.
    #[inline]
    #[must_use]
    pub fn volume(&self) -> &Path {
        &self.volume
    }

    /// Closes the session, reporting a failure to do so.
    ///
    /// # Errors
    /// See [`SecurityApi::close_session`].
    pub fn close(mut self) -> io::Result<()> {
        self.closed = true;
        self.api.close_session(&mut self.session)?;
        info!(volume = %self.volume.display(), "volume closed");
        Ok(())
    }
}

impl<A: SecurityApi + ?Sized> Drop for SessionGuard<'_, A> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        match self.api.close_session(&mut self.session) {
            Ok(()) => info!(volume = %self.volume.display(), "volume closed"),
            Err(err) => warn!(volume = %self.volume.display(), error = %err, "could not close volume"),
        }
    }
}

impl<A: SecurityApi + ?Sized> VolumeSession for SessionGuard<'_, A> {
    delegate! {
        to self.session {
            fn list_entries(&self, path: &Path) -> io::Result<Vec<DirEntry>>;
            fn security_descriptor(
                &self,
                path: &Path,
                kind: DescriptorKind,
            ) -> io::Result<Option<Vec<u8>>>;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Unwrap is not an issue in test")]
mod tests {
    use super::memory::{MemoryApi, MemoryVolume};
    use super::*;

    fn api() -> MemoryApi {
        MemoryApi::new().with_volume("C:", MemoryVolume::new())
    }

    #[test]
    fn guard_closes_on_drop() {
        let api = api();
        {
            let guard = SessionGuard::open(&api, Path::new("C:")).unwrap();
            assert_eq!(api.open_sessions(), 1);
            let entries = guard.list_entries(Path::new("")).unwrap();
            assert!(entries.iter().all(|entry| entry.name.starts_with('.')), "{entries:?}");
        }
        assert_eq!(api.open_sessions(), 0);
    }

    #[test]
    fn guard_closes_explicitly_once() {
        let api = api();
        let guard = SessionGuard::open(&api, Path::new("C:")).unwrap();
        guard.close().unwrap();
        assert_eq!(api.open_sessions(), 0);
        assert_eq!(api.closed_sessions(), 1);
    }

    #[test]
    fn unknown_volume_does_not_open() {
        let api = api();
        let err = SessionGuard::open(&api, Path::new("D:")).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert_eq!(api.open_sessions(), 0);
    }

    #[test]
    fn account_display() {
        let account = DomainAndName::new("WORKSTATION", "alice");
        assert_eq!(account.to_string(), "WORKSTATION\\alice");
    }
}

//! Volumes held in memory, for tests and dry runs.

use core::cell::Cell;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use parsing::{DescriptorKind, SecurityDescriptorBuilder};

use super::{DefaultIdentity, DirEntry, SecurityApi, VolumeSession};
use crate::sid::SecurityIdentifier;

/// Security data of one file of a [`MemoryVolume`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryFile {
    is_directory: bool,
    is_special: bool,
    owner: Option<SecurityIdentifier>,
    group: Option<SecurityIdentifier>,
    dacl: Option<Vec<SecurityIdentifier>>,
    raw: Option<Vec<u8>>,
    unreadable: bool,
}

impl MemoryFile {
    /// A directory without security data.
    #[inline]
    #[must_use]
    pub fn directory() -> Self {
        Self {
            is_directory: true,
            ..Self::default()
        }
    }

    /// A regular file without security data.
    #[inline]
    #[must_use]
    pub fn file() -> Self {
        Self::default()
    }

    /// Marks the entry as a link or reparse point.
    #[inline]
    #[must_use]
    pub const fn special(mut self) -> Self {
        self.is_special = true;
        self
    }

    /// Sets the owner.
    #[inline]
    #[must_use]
    pub fn owner(mut self, sid: SecurityIdentifier) -> Self {
        self.owner = Some(sid);
        self
    }

    /// Sets the primary group.
    #[inline]
    #[must_use]
    pub fn group(mut self, sid: SecurityIdentifier) -> Self {
        self.group = Some(sid);
        self
    }

    /// Adds an allow entry to the discretionary ACL.
    #[inline]
    #[must_use]
    pub fn allow(mut self, sid: SecurityIdentifier) -> Self {
        self.dacl.get_or_insert_with(Vec::new).push(sid);
        self
    }

    /// Serves `bytes` verbatim for every descriptor request.
    #[inline]
    #[must_use]
    pub fn raw_descriptor(mut self, bytes: Vec<u8>) -> Self {
        self.raw = Some(bytes);
        self
    }

    /// Makes every descriptor request fail with a permission error.
    #[inline]
    #[must_use]
    pub const fn unreadable(mut self) -> Self {
        self.unreadable = true;
        self
    }

    fn descriptor(&self, kind: DescriptorKind) -> io::Result<Option<Vec<u8>>> {
        if self.unreadable {
            return Err(io::Error::from(io::ErrorKind::PermissionDenied));
        }
        if let Some(raw) = &self.raw {
            return Ok(Some(raw.clone()));
        }
        let builder = SecurityDescriptorBuilder::new();
        let builder = match kind {
            DescriptorKind::Owner => match &self.owner {
                Some(sid) => builder.owner(sid.as_bytes()),
                None => return Ok(None),
            },
            DescriptorKind::Group => match &self.group {
                Some(sid) => builder.group(sid.as_bytes()),
                None => return Ok(None),
            },
            DescriptorKind::DiscretionaryAcl => match &self.dacl {
                Some(entries) => entries
                    .iter()
                    .fold(builder, |builder, sid| builder.allow(sid.as_bytes())),
                None => return Ok(None),
            },
        };
        builder
            .build()
            .map(Some)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }
}

/// A volume tree, files listed in insertion order.
#[derive(Debug, Clone, Default)]
pub struct MemoryVolume {
    files: Vec<(PathBuf, MemoryFile)>,
}

impl MemoryVolume {
    /// An empty volume.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) the file at `path`, relative to the root.
    #[inline]
    #[must_use]
    pub fn with(mut self, path: impl Into<PathBuf>, file: MemoryFile) -> Self {
        let path = path.into();
        if let Some(slot) = self.files.iter_mut().find(|(known, _)| *known == path) {
            slot.1 = file;
        } else {
            self.files.push((path, file));
        }
        self
    }

    fn get(&self, path: &Path) -> Option<&MemoryFile> {
        self.files
            .iter()
            .find_map(|(known, file)| (known == path).then_some(file))
    }
}

/// Session over a [`MemoryVolume`].
#[derive(Debug, Clone)]
pub struct MemorySession {
    volume: MemoryVolume,
}

impl VolumeSession for MemorySession {
    /// Lists children in insertion order, after `.` and `..` as a native
    /// directory read would.
    fn list_entries(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        if !path.as_os_str().is_empty()
            && !self.volume.get(path).is_some_and(|file| file.is_directory)
        {
            return Err(io::Error::from(io::ErrorKind::NotFound));
        }
        let mut entries = vec![DirEntry::directory("."), DirEntry::directory("..")];
        for (known, file) in &self.volume.files {
            if known.parent() != Some(path) {
                continue;
            }
            let Some(name) = known.file_name() else {
                continue;
            };
            entries.push(DirEntry {
                name: name.to_string_lossy().into_owned(),
                is_directory: file.is_directory,
                is_special: file.is_special,
            });
        }
        Ok(entries)
    }

    fn security_descriptor(
        &self,
        path: &Path,
        kind: DescriptorKind,
    ) -> io::Result<Option<Vec<u8>>> {
        self.volume
            .get(path)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?
            .descriptor(kind)
    }
}

/// A set of named [`MemoryVolume`]s.
///
/// Counts sessions so that tests can check every opened session is closed.
#[derive(Debug, Default)]
pub struct MemoryApi {
    volumes: HashMap<PathBuf, MemoryVolume>,
    identity: Option<DefaultIdentity>,
    open: Cell<usize>,
    closed: Cell<usize>,
}

impl MemoryApi {
    /// No volume, no identity.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `volume` under `name`.
    #[inline]
    #[must_use]
    pub fn with_volume(mut self, name: impl Into<PathBuf>, volume: MemoryVolume) -> Self {
        self.volumes.insert(name.into(), volume);
        self
    }

    /// Sets the account reported by [`SecurityApi::default_identity`].
    #[inline]
    #[must_use]
    pub fn with_identity(mut self, identity: DefaultIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Sessions opened and not yet closed.
    #[inline]
    #[must_use]
    pub fn open_sessions(&self) -> usize {
        self.open.get()
    }

    /// Sessions closed so far.
    #[inline]
    #[must_use]
    pub fn closed_sessions(&self) -> usize {
        self.closed.get()
    }
}

impl SecurityApi for MemoryApi {
    type Session = MemorySession;

    fn open_session(&self, volume: &Path) -> io::Result<Self::Session> {
        let volume = self
            .volumes
            .get(volume)
            .cloned()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;
        self.open.set(self.open.get() + 1);
        Ok(MemorySession { volume })
    }

    fn close_session(&self, _session: &mut Self::Session) -> io::Result<()> {
        self.open.set(self.open.get().saturating_sub(1));
        self.closed.set(self.closed.get() + 1);
        Ok(())
    }

    #[inline]
    fn default_identity(&self) -> Option<DefaultIdentity> {
        self.identity.clone()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Unwrap is not an issue in test")]
mod tests {
    use super::*;
    use parsing::SecurityDescriptor;

    fn sid(text: &str) -> SecurityIdentifier {
        text.parse().unwrap()
    }

    fn session() -> MemorySession {
        let volume = MemoryVolume::new()
            .with("Users", MemoryFile::directory())
            .with(
                "Users/alice",
                MemoryFile::directory()
                    .owner(sid("S-1-5-21-1-2-3-1001"))
                    .allow(sid("S-1-5-18"))
                    .allow(sid("S-1-5-21-1-2-3-1001")),
            )
            .with("Users/link", MemoryFile::directory().special());
        MemorySession { volume }
    }

    #[test]
    fn lists_children_in_order() {
        let names: Vec<_> = session()
            .list_entries(Path::new("Users"))
            .unwrap()
            .into_iter()
            .map(|entry| entry.name)
            .collect();
        assert_eq!(names, [".", "..", "alice", "link"]);
        assert!(session().list_entries(Path::new("Nope")).is_err());
    }

    #[test]
    fn serves_requested_part_only() {
        let session = session();
        let path = Path::new("Users/alice");
        let owner = session
            .security_descriptor(path, DescriptorKind::Owner)
            .unwrap()
            .unwrap();
        let parsed = SecurityDescriptor::parse(&owner).unwrap();
        assert_eq!(parsed.owner(), Some(sid("S-1-5-21-1-2-3-1001").as_bytes()));
        assert!(parsed.group().is_none());
        assert!(parsed.dacl().is_none());

        assert!(
            session
                .security_descriptor(path, DescriptorKind::Group)
                .unwrap()
                .is_none()
        );

        let dacl = session
            .security_descriptor(path, DescriptorKind::DiscretionaryAcl)
            .unwrap()
            .unwrap();
        let parsed = SecurityDescriptor::parse(&dacl).unwrap();
        assert_eq!(parsed.dacl().unwrap().ace_count(), 2);
    }
}

//! Mounted ntfs-3g volumes.
//!
//! ntfs-3g exposes the NTFS security descriptor of every file, in
//! self-relative form, through the `system.ntfs_acl` extended attribute.

use std::ffi::CString;
use std::fs;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use parsing::DescriptorKind;
use tracing::debug;

use super::{DirEntry, SecurityApi, VolumeSession};

const NTFS_ACL_ATTRIBUTE: &[u8] = b"system.ntfs_acl\0";

/// Reads the raw NTFS descriptor of `path`, without following links.
///
/// Filesystems other than ntfs-3g do not know the attribute and report no
/// descriptor.
fn read_ntfs_acl(path: &Path) -> io::Result<Option<Vec<u8>>> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
    let name = NTFS_ACL_ATTRIBUTE.as_ptr().cast::<libc::c_char>();
    loop {
        // SAFETY: both strings are NUL terminated; a null buffer of size 0
        // only queries the attribute size.
        let size = unsafe { libc::lgetxattr(c_path.as_ptr(), name, core::ptr::null_mut(), 0) };
        let Ok(size) = usize::try_from(size) else {
            return match io::Error::last_os_error() {
                err if matches!(err.raw_os_error(), Some(libc::ENODATA | libc::EOPNOTSUPP)) => {
                    Ok(None)
                }
                err => Err(err),
            };
        };
        let mut buffer = vec![0u8; size];
        // SAFETY: `buffer` is valid for writes of `buffer.len()` bytes.
        let read = unsafe {
            libc::lgetxattr(
                c_path.as_ptr(),
                name,
                buffer.as_mut_ptr().cast(),
                buffer.len(),
            )
        };
        match usize::try_from(read) {
            Ok(read) => {
                buffer.truncate(read);
                return Ok(Some(buffer));
            }
            // the descriptor grew between both calls
            Err(_) if io::Error::last_os_error().raw_os_error() == Some(libc::ERANGE) => {}
            Err(_) => return Err(io::Error::last_os_error()),
        }
    }
}

/// Session on a mounted volume.
#[derive(Debug, Clone)]
pub struct Ntfs3gSession {
    mount_point: PathBuf,
}

impl Ntfs3gSession {
    fn resolve(&self, path: &Path) -> PathBuf {
        self.mount_point.join(path)
    }
}

impl VolumeSession for Ntfs3gSession {
    fn list_entries(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(self.resolve(path))? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_directory: file_type.is_dir(),
                is_special: file_type.is_symlink(),
            });
        }
        Ok(entries)
    }

    /// Returns the whole descriptor whatever `kind`: ntfs-3g stores them
    /// as a unit.
    fn security_descriptor(
        &self,
        path: &Path,
        kind: DescriptorKind,
    ) -> io::Result<Option<Vec<u8>>> {
        let descriptor = read_ntfs_acl(&self.resolve(path))?;
        if descriptor.is_none() {
            debug!(path = %path.display(), %kind, "no NTFS descriptor");
        }
        Ok(descriptor)
    }
}

/// Reads descriptors from ntfs-3g mount points.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ntfs3gApi;

impl SecurityApi for Ntfs3gApi {
    type Session = Ntfs3gSession;

    /// Accepts a directory whose root carries an NTFS descriptor.
    fn open_session(&self, volume: &Path) -> io::Result<Self::Session> {
        if !fs::metadata(volume)?.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "not a mount point",
            ));
        }
        if read_ntfs_acl(volume)?.is_none() {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "not an ntfs-3g volume",
            ));
        }
        Ok(Ntfs3gSession {
            mount_point: volume.to_path_buf(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Unwrap is not an issue in test")]
mod tests {
    use super::*;

    #[test]
    fn plain_directory_is_not_a_volume() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Ntfs3gApi.open_session(dir.path()).is_err());
    }

    #[test]
    fn lists_real_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("Users")).unwrap();
        fs::write(dir.path().join("boot.ini"), b"").unwrap();
        let session = Ntfs3gSession {
            mount_point: dir.path().to_path_buf(),
        };
        let mut entries = session.list_entries(Path::new("")).unwrap();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(
            entries,
            [DirEntry::directory("Users"), DirEntry::file("boot.ini")]
        );
        assert!(
            session
                .security_descriptor(Path::new("boot.ini"), DescriptorKind::Owner)
                .unwrap()
                .is_none()
        );
    }
}

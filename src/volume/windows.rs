//! Windows volumes, read through the Win32 security API.

use core::mem::MaybeUninit;
use core::ptr;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::os::windows::ffi::OsStringExt;
use std::os::windows::fs::MetadataExt;
use std::os::windows::io::{AsRawHandle, FromRawHandle, OwnedHandle, RawHandle};
use std::path::{Path, PathBuf};

use parsing::DescriptorKind;
use smallvec::SmallVec;
use tracing::debug;
use widestring::U16CString;
use windows_sys::Win32::Foundation::{ERROR_INSUFFICIENT_BUFFER, GetLastError};
use windows_sys::Win32::Security::{
    GetFileSecurityW, GetLengthSid, GetTokenInformation, LookupAccountSidW, PSID, TOKEN_QUERY,
    TOKEN_USER, TokenUser,
};
use windows_sys::Win32::Storage::FileSystem::FILE_ATTRIBUTE_REPARSE_POINT;
use windows_sys::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

use super::{DefaultIdentity, DirEntry, DomainAndName, SecurityApi, VolumeSession};
use crate::sid::SecurityIdentifier;

fn last_error() -> io::Error {
    // SAFETY: GetLastError can be called immediately after a failing FFI call.
    let code = unsafe { GetLastError() };
    io::Error::from_raw_os_error(code.cast_signed())
}

fn wide(path: &Path) -> io::Result<U16CString> {
    U16CString::from_os_str(path.as_os_str())
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))
}

/// Reads part of a file's security descriptor with the usual size query
/// followed by the real call.
fn file_security(path: &Path, kind: DescriptorKind) -> io::Result<Option<Vec<u8>>> {
    let path = wide(path)?;
    let mut buffer: Vec<u8> = Vec::new();
    loop {
        let mut needed = 0u32;
        let len = u32::try_from(buffer.len())
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        // SAFETY: `path` is NUL terminated and `buffer` is valid for `len` bytes
        // (a null pointer when empty, which only queries the size).
        let ok = unsafe {
            GetFileSecurityW(
                path.as_ptr(),
                kind.security_information(),
                if buffer.is_empty() {
                    ptr::null_mut()
                } else {
                    buffer.as_mut_ptr().cast()
                },
                len,
                &raw mut needed,
            )
        };
        if ok != 0 {
            return Ok((!buffer.is_empty()).then_some(buffer));
        }
        let err = last_error();
        if err.raw_os_error() != Some(ERROR_INSUFFICIENT_BUFFER.cast_signed()) || needed == 0 {
            return Err(err);
        }
        buffer = vec![0u8; needed as usize];
    }
}

/// Token of the running process, opened for queries.
fn process_token() -> io::Result<OwnedHandle> {
    let mut handle: MaybeUninit<RawHandle> = MaybeUninit::uninit();
    // SAFETY: returns a pseudo handle that needs no closing.
    let process = unsafe { GetCurrentProcess() };
    // SAFETY: `handle` is a valid out pointer, read only on success.
    let ok = unsafe { OpenProcessToken(process, TOKEN_QUERY, handle.as_mut_ptr()) };
    if ok == 0 {
        return Err(last_error());
    }
    // SAFETY: the call succeeded, so `handle` is initialized.
    let handle = unsafe { handle.assume_init() };
    // SAFETY: the token handle is ours to close.
    Ok(unsafe { OwnedHandle::from_raw_handle(handle) })
}

/// `TOKEN_USER` block of `token`, grown until the call fits.
fn token_user(token: &OwnedHandle) -> io::Result<Vec<u8>> {
    let mut buffer: Vec<u8> = Vec::new();
    loop {
        let len = u32::try_from(buffer.len())
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        let mut needed = 0u32;
        // SAFETY: `buffer` is valid for `len` bytes, or null when only the size
        // is queried.
        let ok = unsafe {
            GetTokenInformation(
                token.as_raw_handle(),
                TokenUser,
                if buffer.is_empty() {
                    ptr::null_mut()
                } else {
                    buffer.as_mut_ptr().cast()
                },
                len,
                &raw mut needed,
            )
        };
        if ok != 0 && !buffer.is_empty() {
            return Ok(buffer);
        }
        let err = last_error();
        if err.raw_os_error() != Some(ERROR_INSUFFICIENT_BUFFER.cast_signed()) || needed == 0 {
            return Err(err);
        }
        buffer = vec![0u8; needed as usize];
    }
}

/// Identifier of the account the process runs under, copied out of its
/// token.
fn current_user_sid() -> io::Result<SecurityIdentifier> {
    let token = process_token()?;
    let block = token_user(&token)?;
    #[expect(
        clippy::cast_ptr_alignment,
        reason = "the header is read with read_unaligned"
    )]
    let header = block.as_ptr().cast::<TOKEN_USER>();
    // SAFETY: `block` was filled by GetTokenInformation and starts with a
    // TOKEN_USER.
    let field = unsafe { ptr::addr_of!((*header).User.Sid) };
    // SAFETY: the field lies inside `block`; its SID pointer targets the same
    // allocation.
    let sid: PSID = unsafe { ptr::read_unaligned(field) };
    // SAFETY: `sid` points to a well-formed SID inside `block`.
    let len = unsafe { GetLengthSid(sid) } as usize;
    // SAFETY: the SID occupies `len` bytes of `block`, alive for this borrow.
    let bytes = unsafe { core::slice::from_raw_parts(sid.cast::<u8>(), len) };
    SecurityIdentifier::from_bytes(bytes)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
}

/// Resolves `DOMAIN\Name` of a SID on the local machine.
fn lookup_account(sid: &SecurityIdentifier) -> io::Result<DomainAndName> {
    let mut raw_sid = sid.as_bytes().to_vec();
    let psid: PSID = raw_sid.as_mut_ptr().cast();
    let mut name_len = 0u32;
    let mut domain_len = 0u32;
    let mut sid_type_raw = 0i32;
    // SAFETY: size query, all pointers valid or null with zero lengths.
    let ok = unsafe {
        LookupAccountSidW(
            ptr::null(),
            psid,
            ptr::null_mut(),
            &raw mut name_len,
            ptr::null_mut(),
            &raw mut domain_len,
            &raw mut sid_type_raw,
        )
    };
    if ok != 0 {
        return Err(io::Error::other("account size query unexpectedly succeeded"));
    }
    loop {
        let err = last_error();
        if err.raw_os_error() != Some(ERROR_INSUFFICIENT_BUFFER.cast_signed()) {
            return Err(err);
        }
        let mut name_buffer = SmallVec::<[u16; 256]>::from_elem(0, name_len as usize);
        let mut domain_buffer = SmallVec::<[u16; 256]>::from_elem(0, domain_len as usize);
        // SAFETY: buffers hold `name_len` and `domain_len` elements.
        let ok = unsafe {
            LookupAccountSidW(
                ptr::null(),
                psid,
                name_buffer.as_mut_ptr(),
                &raw mut name_len,
                domain_buffer.as_mut_ptr(),
                &raw mut domain_len,
                &raw mut sid_type_raw,
            )
        };
        if ok != 0 {
            // on success the lengths exclude the terminating NUL
            name_buffer.truncate(name_len as usize);
            domain_buffer.truncate(domain_len as usize);
            let name = OsString::from_wide(&name_buffer);
            let domain = OsString::from_wide(&domain_buffer);
            return Ok(DomainAndName::new(
                domain.to_string_lossy(),
                name.to_string_lossy(),
            ));
        }
    }
}

/// Session on a drive root such as `C:\`.
#[derive(Debug, Clone)]
pub struct WindowsSession {
    root: PathBuf,
}

impl VolumeSession for WindowsSession {
    fn list_entries(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(self.root.join(path))? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_directory: metadata.is_dir(),
                is_special: metadata.file_attributes() & FILE_ATTRIBUTE_REPARSE_POINT != 0,
            });
        }
        Ok(entries)
    }

    fn security_descriptor(
        &self,
        path: &Path,
        kind: DescriptorKind,
    ) -> io::Result<Option<Vec<u8>>> {
        file_security(&self.root.join(path), kind)
    }
}

/// Reads descriptors of local drives.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowsApi;

impl SecurityApi for WindowsApi {
    type Session = WindowsSession;

    fn open_session(&self, volume: &Path) -> io::Result<Self::Session> {
        let mut root = volume.as_os_str().to_owned();
        if !volume.as_os_str().to_string_lossy().ends_with(['\\', '/']) {
            root.push("\\");
        }
        let root = PathBuf::from(root);
        file_security(&root, DescriptorKind::Owner)?;
        Ok(WindowsSession { root })
    }

    fn default_identity(&self) -> Option<DefaultIdentity> {
        let sid = current_user_sid()
            .map_err(|err| debug!(error = %err, "no current user"))
            .ok()?;
        let account = lookup_account(&sid)
            .map_err(|err| debug!(%sid, error = %err, "account lookup failed"))
            .ok()?;
        Some(DefaultIdentity { sid, account })
    }
}

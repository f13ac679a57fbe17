//! Self-relative security descriptors and their discretionary ACL.
//!
//! Layout of the 20-byte header:
//! `[revision:1][sbz1:1][control:2][owner:4][group:4][sacl:4][dacl:4]`,
//! every offset relative to the start of the descriptor, `0` meaning absent.

use core::fmt::{self, Display};

use thiserror::Error;

use crate::{read_u32_le, sid_len};

const DESCRIPTOR_HEADER_SIZE: usize = 20;
const DESCRIPTOR_REVISION: u8 = 1;
const OWNER_OFFSET: usize = 4;
const GROUP_OFFSET: usize = 8;
const DACL_OFFSET: usize = 16;

const SE_DACL_PRESENT: u16 = 0x0004;
const SE_SELF_RELATIVE: u16 = 0x8000;

const ACL_HEADER_SIZE: usize = 8;
const ACL_REVISION: u8 = 2;
const ACE_HEADER_SIZE: usize = 4;
/// Offset of the trustee SID in the basic (non-object) ACE layouts.
const ACE_SID_OFFSET: usize = 8;

const ACCESS_ALLOWED_ACE_TYPE: u8 = 0x00;
const FILE_ALL_ACCESS: u32 = 0x001F_01FF;

/// Which part of a security descriptor is requested from a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    /// The owner SID.
    Owner,
    /// The primary group SID.
    Group,
    /// The discretionary access control list.
    DiscretionaryAcl,
}

impl DescriptorKind {
    /// The matching `SECURITY_INFORMATION` bit.
    #[must_use]
    pub const fn security_information(self) -> u32 {
        match self {
            Self::Owner => 0x1,
            Self::Group => 0x2,
            Self::DiscretionaryAcl => 0x4,
        }
    }
}

impl Display for DescriptorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Owner => "owner",
            Self::Group => "group",
            Self::DiscretionaryAcl => "discretionary ACL",
        })
    }
}

/// Error returned when a security descriptor or ACL is malformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InvalidDescriptor {
    /// The buffer ends before a structure it announces.
    #[error("security descriptor is truncated")]
    Truncated,
    /// The revision byte is not a known revision.
    #[error("unsupported security descriptor revision {0}")]
    Revision(u8),
    /// The descriptor is in absolute (pointer based) form.
    #[error("security descriptor is not self-relative")]
    NotSelfRelative,
    /// An ACE header announces a size that does not fit.
    #[error("malformed access control entry at offset {0}")]
    MalformedAce(usize),
    /// A structure is too large for its size field.
    #[error("security descriptor component too large")]
    TooLarge,
}

fn read_u16_le(bytes: &[u8], offset: usize) -> Option<u16> {
    let raw = bytes.get(offset..offset.checked_add(2)?)?;
    raw.try_into().ok().map(u16::from_le_bytes)
}

fn sid_at(bytes: &[u8], offset: usize) -> Result<&[u8], InvalidDescriptor> {
    let tail = bytes.get(offset..).ok_or(InvalidDescriptor::Truncated)?;
    let len = sid_len(tail).ok_or(InvalidDescriptor::Truncated)?;
    tail.get(..len).ok_or(InvalidDescriptor::Truncated)
}

fn component_offset(bytes: &[u8], field: usize) -> Result<Option<usize>, InvalidDescriptor> {
    let offset = read_u32_le(bytes, field).ok_or(InvalidDescriptor::Truncated)?;
    Ok((offset != 0).then_some(offset as usize))
}

/// Borrowed view over a self-relative security descriptor.
#[derive(Debug, Clone, Copy)]
pub struct SecurityDescriptor<'a> {
    owner: Option<&'a [u8]>,
    group: Option<&'a [u8]>,
    dacl: Option<Acl<'a>>,
}

impl<'a> SecurityDescriptor<'a> {
    /// Parses a self-relative descriptor, slicing out its owner, group and
    /// discretionary ACL.
    ///
    /// # Errors
    /// [`InvalidDescriptor`] if the header or any announced component does not
    /// fit in `bytes`.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, InvalidDescriptor> {
        if bytes.len() < DESCRIPTOR_HEADER_SIZE {
            return Err(InvalidDescriptor::Truncated);
        }
        let revision = bytes.first().copied().ok_or(InvalidDescriptor::Truncated)?;
        if revision != DESCRIPTOR_REVISION {
            return Err(InvalidDescriptor::Revision(revision));
        }
        let control = read_u16_le(bytes, 2).ok_or(InvalidDescriptor::Truncated)?;
        if control & SE_SELF_RELATIVE == 0 {
            return Err(InvalidDescriptor::NotSelfRelative);
        }

        let owner = component_offset(bytes, OWNER_OFFSET)?
            .map(|offset| sid_at(bytes, offset))
            .transpose()?;
        let group = component_offset(bytes, GROUP_OFFSET)?
            .map(|offset| sid_at(bytes, offset))
            .transpose()?;
        let dacl = if control & SE_DACL_PRESENT == 0 {
            None
        } else {
            component_offset(bytes, DACL_OFFSET)?
                .map(|offset| {
                    bytes
                        .get(offset..)
                        .ok_or(InvalidDescriptor::Truncated)
                        .and_then(Acl::parse)
                })
                .transpose()?
        };
        Ok(Self { owner, group, dacl })
    }

    /// The owner SID bytes, if the descriptor carries one.
    #[must_use]
    pub const fn owner(&self) -> Option<&'a [u8]> {
        self.owner
    }

    /// The primary group SID bytes, if the descriptor carries one.
    #[must_use]
    pub const fn group(&self) -> Option<&'a [u8]> {
        self.group
    }

    /// The discretionary ACL, if present.
    #[must_use]
    pub const fn dacl(&self) -> Option<Acl<'a>> {
        self.dacl
    }
}

/// Borrowed view over an access control list.
#[derive(Debug, Clone, Copy)]
pub struct Acl<'a> {
    body: &'a [u8],
    ace_count: u16,
}

impl<'a> Acl<'a> {
    /// Parses the ACL header; entries are decoded lazily by [`Acl::principals`].
    ///
    /// # Errors
    /// [`InvalidDescriptor::Truncated`] if the declared size exceeds `bytes`.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, InvalidDescriptor> {
        let size = usize::from(read_u16_le(bytes, 2).ok_or(InvalidDescriptor::Truncated)?);
        let ace_count = read_u16_le(bytes, 4).ok_or(InvalidDescriptor::Truncated)?;
        if size < ACL_HEADER_SIZE {
            return Err(InvalidDescriptor::Truncated);
        }
        let body = bytes.get(..size).ok_or(InvalidDescriptor::Truncated)?;
        Ok(Self { body, ace_count })
    }

    /// Number of entries announced by the header.
    #[must_use]
    pub const fn ace_count(&self) -> u16 {
        self.ace_count
    }

    /// Iterates the trustee SIDs of the entries that name one directly.
    ///
    /// Object ACEs (whose SID follows optional GUIDs) are skipped.
    #[must_use]
    pub const fn principals(&self) -> AclPrincipals<'a> {
        AclPrincipals {
            body: self.body,
            offset: ACL_HEADER_SIZE,
            remaining: self.ace_count,
        }
    }
}

/// Iterator returned by [`Acl::principals`].
///
/// Stops after the first malformed entry.
#[derive(Debug, Clone)]
pub struct AclPrincipals<'a> {
    body: &'a [u8],
    offset: usize,
    remaining: u16,
}

const fn has_plain_sid(ace_type: u8) -> bool {
    // allowed, denied, audit, alarm and their callback variants
    matches!(ace_type, 0x00..=0x03 | 0x09 | 0x0A | 0x0D | 0x0E | 0x11..=0x13)
}

impl<'a> AclPrincipals<'a> {
    fn entry(&self) -> Result<(u8, &'a [u8]), InvalidDescriptor> {
        let ace_type = *self
            .body
            .get(self.offset)
            .ok_or(InvalidDescriptor::MalformedAce(self.offset))?;
        let size = usize::from(
            read_u16_le(self.body, self.offset + 2)
                .ok_or(InvalidDescriptor::MalformedAce(self.offset))?,
        );
        if size < ACE_HEADER_SIZE {
            return Err(InvalidDescriptor::MalformedAce(self.offset));
        }
        let ace = self
            .body
            .get(self.offset..self.offset + size)
            .ok_or(InvalidDescriptor::MalformedAce(self.offset))?;
        Ok((ace_type, ace))
    }
}

impl<'a> Iterator for AclPrincipals<'a> {
    type Item = Result<&'a [u8], InvalidDescriptor>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.remaining > 0 {
            self.remaining -= 1;
            let (ace_type, ace) = match self.entry() {
                Ok(entry) => entry,
                Err(err) => {
                    self.remaining = 0;
                    return Some(Err(err));
                }
            };
            let at = self.offset;
            self.offset += ace.len();
            if has_plain_sid(ace_type) {
                return Some(sid_at(ace, ACE_SID_OFFSET).map_err(|_| {
                    self.remaining = 0;
                    InvalidDescriptor::MalformedAce(at)
                }));
            }
        }
        None
    }
}

/// Builds self-relative descriptors, for volumes that keep identifiers
/// rather than native descriptors.
#[derive(Debug, Clone, Default)]
pub struct SecurityDescriptorBuilder {
    owner: Option<Vec<u8>>,
    group: Option<Vec<u8>>,
    dacl: Option<Vec<Vec<u8>>>,
}

fn to_u32(value: usize) -> Result<u32, InvalidDescriptor> {
    u32::try_from(value).map_err(|_| InvalidDescriptor::TooLarge)
}

fn to_u16(value: usize) -> Result<u16, InvalidDescriptor> {
    u16::try_from(value).map_err(|_| InvalidDescriptor::TooLarge)
}

impl SecurityDescriptorBuilder {
    /// Starts an empty descriptor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the owner SID.
    #[must_use]
    pub fn owner(mut self, sid: &[u8]) -> Self {
        self.owner = Some(sid.to_vec());
        self
    }

    /// Sets the primary group SID.
    #[must_use]
    pub fn group(mut self, sid: &[u8]) -> Self {
        self.group = Some(sid.to_vec());
        self
    }

    /// Adds a full-access allow entry for `sid`, creating the DACL if needed.
    #[must_use]
    pub fn allow(mut self, sid: &[u8]) -> Self {
        self.dacl.get_or_insert_with(Vec::new).push(sid.to_vec());
        self
    }

    fn encode_acl(entries: &[Vec<u8>]) -> Result<Vec<u8>, InvalidDescriptor> {
        let mut aces = Vec::new();
        for sid in entries {
            let size = to_u16(ACE_SID_OFFSET + sid.len())?;
            aces.push(ACCESS_ALLOWED_ACE_TYPE);
            aces.push(0);
            aces.extend_from_slice(&size.to_le_bytes());
            aces.extend_from_slice(&FILE_ALL_ACCESS.to_le_bytes());
            aces.extend_from_slice(sid);
        }
        let mut acl = Vec::with_capacity(ACL_HEADER_SIZE + aces.len());
        acl.push(ACL_REVISION);
        acl.push(0);
        acl.extend_from_slice(&to_u16(ACL_HEADER_SIZE + aces.len())?.to_le_bytes());
        acl.extend_from_slice(&to_u16(entries.len())?.to_le_bytes());
        acl.extend_from_slice(&[0, 0]);
        acl.extend_from_slice(&aces);
        Ok(acl)
    }

    /// Encodes the descriptor: header, owner, group, then DACL.
    ///
    /// # Errors
    /// [`InvalidDescriptor::TooLarge`] if the ACL does not fit its 16-bit size.
    pub fn build(&self) -> Result<Vec<u8>, InvalidDescriptor> {
        let mut control = SE_SELF_RELATIVE;
        let mut tail = Vec::new();
        let mut offsets = [0u32; 4];

        if let Some(owner) = &self.owner {
            offsets[0] = to_u32(DESCRIPTOR_HEADER_SIZE + tail.len())?;
            tail.extend_from_slice(owner);
        }
        if let Some(group) = &self.group {
            offsets[1] = to_u32(DESCRIPTOR_HEADER_SIZE + tail.len())?;
            tail.extend_from_slice(group);
        }
        if let Some(entries) = &self.dacl {
            control |= SE_DACL_PRESENT;
            offsets[3] = to_u32(DESCRIPTOR_HEADER_SIZE + tail.len())?;
            tail.extend_from_slice(&Self::encode_acl(entries)?);
        }

        let mut bytes = Vec::with_capacity(DESCRIPTOR_HEADER_SIZE + tail.len());
        bytes.push(DESCRIPTOR_REVISION);
        bytes.push(0);
        bytes.extend_from_slice(&control.to_le_bytes());
        for offset in offsets {
            bytes.extend_from_slice(&offset.to_le_bytes());
        }
        bytes.extend_from_slice(&tail);
        Ok(bytes)
    }
}

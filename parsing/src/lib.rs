//! Byte-level decoding of Windows security identifiers and self-relative
//! security descriptors, as found in NTFS security attributes.
//!
//! A binary SID is laid out as
//! `[revision:1][sub_authority_count:1][authority:6 big-endian][sub_authority:4 little-endian]*`.

use core::fmt::{self, Display};
use core::str::FromStr;

use arrayvec::ArrayVec;
use thiserror::Error;

mod descriptor;
pub use descriptor::{
    Acl, AclPrincipals, DescriptorKind, InvalidDescriptor, SecurityDescriptor,
    SecurityDescriptorBuilder,
};

/// Size of the fixed SID header (revision, count, authority).
pub const SID_HEADER_SIZE: usize = 8;

/// Upper bound on the number of sub-authorities kept when decoding.
///
/// Identifiers claiming more sub-authorities are truncated to this many in
/// their textual form. Account identifiers use five.
pub const MAX_DECODED_SUB_AUTHORITIES: usize = 8;

/// Identifier authority of NT accounts (`S-1-5-...`).
pub const NT_AUTHORITY: u64 = 5;

/// First sub-authority of local and domain account identifiers (`S-1-5-21-...`).
pub const ACCOUNT_DOMAIN_SUB_AUTHORITY: u32 = 21;

/// Relative identifier of the standard users group of a domain.
pub const GENERIC_GROUP_RID: u32 = 513;

const GENERIC_GROUP_PREFIX: &str = "S-1-5-21-";
const GENERIC_GROUP_SUFFIX: &str = "-513";

/// Decoded components of a SID.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SidComponents {
    /// The SID revision value, generally 1.
    pub revision: u8,
    /// The SID identifier authority value (big-endian).
    pub identifier_authority: [u8; 6],
    /// The SID sub-authority values.
    pub sub_authority: ArrayVec<u32, MAX_DECODED_SUB_AUTHORITIES>,
}

/// Error returned when a SID, either binary or textual, is malformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Invalid format for Sid")]
pub struct InvalidSidFormat;

pub(crate) fn read_u32_le(bytes: &[u8], offset: usize) -> Option<u32> {
    let raw = bytes.get(offset..offset.checked_add(4)?)?;
    raw.try_into().ok().map(u32::from_le_bytes)
}

/// Length in bytes of the binary SID starting at `bytes`, as declared by its
/// sub-authority count.
///
/// Returns `None` when the header is truncated or the buffer is shorter than
/// the declared length.
#[must_use]
pub fn sid_len(bytes: &[u8]) -> Option<usize> {
    let count = usize::from(*bytes.get(1)?);
    let len = SID_HEADER_SIZE + 4 * count;
    (bytes.len() >= len).then_some(len)
}

impl SidComponents {
    /// Decodes a binary SID.
    ///
    /// Only the first [`MAX_DECODED_SUB_AUTHORITIES`] sub-authorities are read,
    /// whatever the count byte claims.
    ///
    /// # Errors
    /// [`InvalidSidFormat`] if the buffer is shorter than the header plus the
    /// decoded sub-authorities.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, InvalidSidFormat> {
        let header: [u8; SID_HEADER_SIZE] = bytes
            .get(..SID_HEADER_SIZE)
            .and_then(|header| header.try_into().ok())
            .ok_or(InvalidSidFormat)?;
        let [revision, count, identifier_authority @ ..] = header;
        let count = usize::from(count).min(MAX_DECODED_SUB_AUTHORITIES);

        let mut sub_authority = ArrayVec::new();
        for index in 0..count {
            let value = read_u32_le(bytes, SID_HEADER_SIZE + 4 * index).ok_or(InvalidSidFormat)?;
            sub_authority.push(value);
        }
        Ok(Self {
            revision,
            identifier_authority,
            sub_authority,
        })
    }

    /// The 48-bit identifier authority as an integer.
    #[must_use]
    pub fn authority(&self) -> u64 {
        let [a, b, c, d, e, f] = self.identifier_authority;
        u64::from_be_bytes([0, 0, a, b, c, d, e, f])
    }

    /// Whether this identifier belongs to a local or domain account namespace
    /// (authority 5, first sub-authority 21).
    #[must_use]
    pub fn is_account_domain(&self) -> bool {
        self.authority() == NT_AUTHORITY
            && self.sub_authority.first() == Some(&ACCOUNT_DOMAIN_SUB_AUTHORITY)
    }

    /// The last sub-authority (relative identifier), if any.
    #[must_use]
    pub fn rid(&self) -> Option<u32> {
        self.sub_authority.last().copied()
    }

    /// Whether both identifiers are equal up to their final sub-authority.
    #[must_use]
    pub fn shares_domain(&self, other: &Self) -> bool {
        let (Some((_, mine)), Some((_, theirs))) = (
            self.sub_authority.split_last(),
            other.sub_authority.split_last(),
        ) else {
            return false;
        };
        self.revision == other.revision
            && self.identifier_authority == other.identifier_authority
            && mine == theirs
    }

    /// Encodes back to the binary layout.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(SID_HEADER_SIZE + 4 * self.sub_authority.len());
        bytes.push(self.revision);
        #[expect(
            clippy::cast_possible_truncation,
            reason = "sub_authority is bounded by MAX_DECODED_SUB_AUTHORITIES"
        )]
        bytes.push(self.sub_authority.len() as u8);
        bytes.extend_from_slice(&self.identifier_authority);
        for value in &self.sub_authority {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes
    }
}

impl Display for SidComponents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}-{}", self.revision, self.authority())?;
        for sub_auth in &self.sub_authority {
            write!(f, "-{sub_auth}")?;
        }
        Ok(())
    }
}

impl FromStr for SidComponents {
    type Err = InvalidSidFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut s_cmp = s.split('-');
        if !s_cmp
            .next()
            .is_some_and(|head| head.eq_ignore_ascii_case("s"))
        {
            return Err(InvalidSidFormat);
        }
        let revision = s_cmp
            .next()
            .ok_or(InvalidSidFormat)?
            .parse::<u8>()
            .map_err(|_| InvalidSidFormat)?;

        let authority = s_cmp
            .next()
            .ok_or(InvalidSidFormat)?
            .parse::<u64>()
            .map_err(|_| InvalidSidFormat)?;
        if authority >> 48 != 0 {
            return Err(InvalidSidFormat);
        }
        let [_, _, identifier_authority @ ..] = authority.to_be_bytes();

        let mut sub_authority = ArrayVec::new();
        for item in s_cmp {
            let item = item.parse::<u32>().map_err(|_| InvalidSidFormat)?;
            sub_authority.try_push(item).map_err(|_| InvalidSidFormat)?;
        }
        if sub_authority.is_empty() {
            return Err(InvalidSidFormat);
        }

        Ok(Self {
            revision,
            identifier_authority,
            sub_authority,
        })
    }
}

/// Decodes a binary SID into its canonical `S-R-A-S0-S1-...` form.
///
/// # Errors
/// [`InvalidSidFormat`] if the buffer is truncated.
///
/// # Examples
/// ```rust
/// let bytes = [1, 2, 0, 0, 0, 0, 0, 5, 21, 0, 0, 0, 1, 2, 0, 0];
/// assert_eq!(ntfs_usermap_parsing::decode(&bytes).unwrap(), "S-1-5-21-513");
/// ```
pub fn decode(bytes: &[u8]) -> Result<String, InvalidSidFormat> {
    SidComponents::from_bytes(bytes).map(|components| components.to_string())
}

/// Whether a canonical identifier names the standard users group of an
/// account domain (`S-1-5-21-...-513`).
#[must_use]
pub fn is_generic_group(sid: &str) -> bool {
    sid.starts_with(GENERIC_GROUP_PREFIX) && sid.ends_with(GENERIC_GROUP_SUFFIX)
}

/// Copies a binary SID, replacing its final sub-authority with
/// [`GENERIC_GROUP_RID`].
///
/// The result has the same declared length as the input.
///
/// # Errors
/// [`InvalidSidFormat`] if the SID has no sub-authority or is truncated.
pub fn derive_group_identifier(sid: &[u8]) -> Result<Vec<u8>, InvalidSidFormat> {
    let len = sid_len(sid).ok_or(InvalidSidFormat)?;
    if len == SID_HEADER_SIZE {
        return Err(InvalidSidFormat);
    }
    let mut group = sid.get(..len).ok_or(InvalidSidFormat)?.to_vec();
    if let Some(last) = group.get_mut(len - 4..) {
        last.copy_from_slice(&GENERIC_GROUP_RID.to_le_bytes());
    }
    Ok(group)
}

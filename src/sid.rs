//! Owned security identifiers as read from NTFS security descriptors.

use core::fmt::{self, Debug, Display};
use core::str::FromStr;

pub use parsing::{
    InvalidSidFormat, MAX_DECODED_SUB_AUTHORITIES, SidComponents, decode, derive_group_identifier,
    is_generic_group,
};

/// Owned Windows **Security Identifier** (SID).
///
/// Keeps an exact copy of the binary form (header plus the declared
/// sub-authorities) next to its decoded components and canonical text, so that
/// the text is computed once per identifier.
///
/// # Examples
/// ```rust
/// # use ntfs_usermap::SecurityIdentifier;
/// let bytes = [1, 2, 0, 0, 0, 0, 0, 5, 21, 0, 0, 0, 0xE9, 3, 0, 0];
/// let sid = SecurityIdentifier::from_bytes(&bytes).unwrap();
/// assert_eq!(sid.to_string(), "S-1-5-21-1001");
/// assert_eq!(sid.to_generic_group().unwrap().to_string(), "S-1-5-21-513");
/// ```
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SecurityIdentifier {
    bytes: Box<[u8]>,
    components: SidComponents,
    text: Box<str>,
}

impl Debug for SecurityIdentifier {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", stringify!(SecurityIdentifier), self.text)
    }
}

impl SecurityIdentifier {
    /// Copies the SID found at the start of `bytes`.
    ///
    /// Trailing bytes past the declared sub-authorities are ignored, which lets
    /// callers pass a slice running to the end of a descriptor.
    ///
    /// # Errors
    /// [`InvalidSidFormat`] if the buffer is shorter than the SID it announces.
    #[inline]
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, InvalidSidFormat> {
        let len = parsing::sid_len(bytes).ok_or(InvalidSidFormat)?;
        let bytes = bytes.get(..len).ok_or(InvalidSidFormat)?;
        let components = SidComponents::from_bytes(bytes)?;
        let text = components.to_string().into_boxed_str();
        Ok(Self {
            bytes: bytes.into(),
            components,
            text,
        })
    }

    /// The binary form, exactly as long as its sub-authority count declares.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The canonical `S-R-A-S0-...` text.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// The decoded components.
    #[inline]
    #[must_use]
    pub const fn components(&self) -> &SidComponents {
        &self.components
    }

    /// Whether this identifier names a local or domain account
    /// (`S-1-5-21-...`). Only those are mapped.
    #[inline]
    #[must_use]
    pub fn is_account_domain(&self) -> bool {
        self.components.is_account_domain()
    }

    /// Whether this identifier is the standard users group of its domain.
    #[inline]
    #[must_use]
    pub fn is_generic_group(&self) -> bool {
        is_generic_group(&self.text)
    }

    /// Whether both identifiers belong to the same domain, that is are equal up
    /// to their final sub-authority.
    #[inline]
    #[must_use]
    pub fn shares_domain(&self, other: &Self) -> bool {
        self.components.shares_domain(&other.components)
    }

    /// The standard users group of this identifier's domain: the same SID with
    /// its last sub-authority replaced by 513.
    ///
    /// # Errors
    /// [`InvalidSidFormat`] if the identifier has no sub-authority.
    #[inline]
    pub fn to_generic_group(&self) -> Result<Self, InvalidSidFormat> {
        Self::from_bytes(&derive_group_identifier(&self.bytes)?)
    }
}

impl TryFrom<&[u8]> for SecurityIdentifier {
    type Error = InvalidSidFormat;

    #[inline]
    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        Self::from_bytes(value)
    }
}

impl FromStr for SecurityIdentifier {
    type Err = InvalidSidFormat;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let components = SidComponents::from_str(s)?;
        Self::from_bytes(&components.to_bytes())
    }
}

impl AsRef<[u8]> for SecurityIdentifier {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl Display for SecurityIdentifier {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

//! Registration of the identifiers found in security descriptors.

use std::path::Path;

use parsing::{DescriptorKind, SecurityDescriptor};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::mapping::{MappingTable, RecordId};
use crate::prompt::{MappingRequest, ResolutionPrompter, Role, ask_validated};
use crate::sid::SecurityIdentifier;

/// Feeds identifiers into a [`MappingTable`], asking the operator about the
/// ones it has not seen yet.
///
/// Without a prompter (unattended run) new records stay pending.
pub struct Ingestor<'a, P: ?Sized> {
    table: &'a mut MappingTable,
    prompter: Option<&'a mut P>,
}

impl<'a, P: ResolutionPrompter + ?Sized> Ingestor<'a, P> {
    /// Ingests into `table`.
    #[inline]
    pub const fn new(table: &'a mut MappingTable, prompter: Option<&'a mut P>) -> Self {
        Self { table, prompter }
    }

    /// The table being filled.
    #[inline]
    #[must_use]
    pub fn table(&self) -> &MappingTable {
        self.table
    }

    /// The prompter, if the run is attended.
    #[inline]
    pub fn prompter(&mut self) -> Option<&mut P> {
        self.prompter.as_deref_mut()
    }

    /// Registers every identifier of the `kind` part of a self-relative
    /// descriptor. Principals of the discretionary ACL count as groups.
    ///
    /// Returns the number of identifiers that reached the table.
    ///
    /// # Errors
    /// [`Error::InvalidDescriptor`] or [`Error::InvalidSid`] for malformed
    /// data, [`Error::Prompt`] if the operator could not be asked.
    pub fn ingest_descriptor(
        &mut self,
        account: Option<&str>,
        path: &Path,
        descriptor: &[u8],
        kind: DescriptorKind,
    ) -> Result<usize> {
        let descriptor = SecurityDescriptor::parse(descriptor)?;
        let mut registered = 0;
        match kind {
            DescriptorKind::Owner => {
                if let Some(sid) = descriptor.owner() {
                    registered += self.count(account, path, sid, Role::Owner)?;
                }
            }
            DescriptorKind::Group => {
                if let Some(sid) = descriptor.group() {
                    registered += self.count(account, path, sid, Role::Group)?;
                }
            }
            DescriptorKind::DiscretionaryAcl => {
                let Some(acl) = descriptor.dacl() else {
                    debug!(path = %path.display(), "no discretionary ACL");
                    return Ok(0);
                };
                for principal in acl.principals() {
                    registered += self.count(account, path, principal?, Role::Group)?;
                }
            }
        }
        Ok(registered)
    }

    fn count(
        &mut self,
        account: Option<&str>,
        path: &Path,
        sid: &[u8],
        role: Role,
    ) -> Result<usize> {
        Ok(usize::from(self.register(account, path, sid, role)?.is_some()))
    }

    /// Registers one binary identifier found on `path`.
    ///
    /// Identifiers outside account domains are dropped and `Ok(None)` is
    /// returned.
    ///
    /// # Errors
    /// See [`Ingestor::ingest_descriptor`].
    pub fn register(
        &mut self,
        account: Option<&str>,
        path: &Path,
        sid: &[u8],
        role: Role,
    ) -> Result<Option<RecordId>> {
        let sid = SecurityIdentifier::from_bytes(sid)?;
        if !sid.is_account_domain() {
            trace!(%sid, "not an account identifier");
            return Ok(None);
        }
        self.register_identifier(account, path, &sid, role).map(Some)
    }

    /// Registers an account identifier, prompting when its mapping is unknown.
    ///
    /// A defined record is never asked about again. A pending one is asked
    /// about again only when seen under another account name.
    ///
    /// # Errors
    /// [`Error::Prompt`] if the operator could not be asked.
    pub fn register_identifier(
        &mut self,
        account: Option<&str>,
        path: &Path,
        sid: &SecurityIdentifier,
        role: Role,
    ) -> Result<RecordId> {
        let (id, created) = self.table.find_or_create_pending(sid, account);
        let record = &self.table[id];
        let ask = created
            || (!record.is_defined() && account.is_some() && record.account() != account);
        if !ask {
            return Ok(id);
        }
        let Some(prompter) = self.prompter.as_deref_mut() else {
            return Ok(id);
        };
        let request = MappingRequest {
            sid,
            account,
            path,
            role,
        };
        let answer = ask_validated(prompter, &request).map_err(Error::Prompt)?;
        if let Some(answer) = answer {
            match role {
                Role::Owner => self.table.resolve(id, answer.clone(), answer),
                Role::Group => self.table.resolve(id, "", answer),
            }
            debug!(%sid, %role, "identifier mapped");
        }
        self.table.note_account(id, account);
        Ok(id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Unwrap is not an issue in test")]
mod tests {
    use super::*;
    use crate::prompt::ScriptedPrompter;
    use parsing::SecurityDescriptorBuilder;

    const ALICE: &str = "S-1-5-21-1-2-3-1001";
    const USERS: &str = "S-1-5-21-1-2-3-513";

    fn sid(text: &str) -> SecurityIdentifier {
        text.parse().unwrap()
    }

    #[test]
    fn owner_answer_maps_user_and_group() {
        let mut table = MappingTable::new();
        let mut prompter = ScriptedPrompter::new(["1000"]);
        let mut ingest = Ingestor::new(&mut table, Some(&mut prompter));
        let id = ingest
            .register_identifier(Some("alice"), Path::new("Users/alice"), &sid(ALICE), Role::Owner)
            .unwrap();
        assert_eq!(table[id].owner(), "1000");
        assert_eq!(table[id].group(), "1000");
        assert!(table[id].is_defined());
    }

    #[test]
    fn group_answer_maps_group_only() {
        let mut table = MappingTable::new();
        let mut prompter = ScriptedPrompter::new(["100"]);
        let mut ingest = Ingestor::new(&mut table, Some(&mut prompter));
        let id = ingest
            .register_identifier(None, Path::new("Data"), &sid(USERS), Role::Group)
            .unwrap();
        assert_eq!(table[id].owner(), "");
        assert_eq!(table[id].group(), "100");
    }

    #[test]
    fn pending_is_asked_again_under_another_account() {
        let mut table = MappingTable::new();
        let mut prompter = ScriptedPrompter::new(["", "", "", "1002"]);
        let mut ingest = Ingestor::new(&mut table, Some(&mut prompter));
        let alice = sid(ALICE);
        let path = Path::new("Users/x");
        ingest.register_identifier(Some("alice"), path, &alice, Role::Owner).unwrap();
        // same account, no account: not asked
        ingest.register_identifier(Some("alice"), path, &alice, Role::Owner).unwrap();
        ingest.register_identifier(None, path, &alice, Role::Owner).unwrap();
        // other account: asked, still deferred
        ingest.register_identifier(Some("bob"), path, &alice, Role::Owner).unwrap();
        // back under the first account: asked again
        let id = ingest.register_identifier(Some("alice"), path, &alice, Role::Owner).unwrap();
        assert_eq!(prompter.asked(), [ALICE, ALICE, ALICE]);
        assert!(!table[id].is_defined());
        assert_eq!(table[id].account(), Some("alice"));
    }

    #[test]
    fn defined_is_never_asked_again() {
        let mut table = MappingTable::new();
        let mut prompter = ScriptedPrompter::new(["1000", "2000"]);
        let mut ingest = Ingestor::new(&mut table, Some(&mut prompter));
        let path = Path::new("Users/x");
        ingest.register_identifier(Some("alice"), path, &sid(ALICE), Role::Owner).unwrap();
        let id = ingest.register_identifier(Some("bob"), path, &sid(ALICE), Role::Group).unwrap();
        assert_eq!(prompter.asked().len(), 1);
        assert_eq!(table[id].owner(), "1000");
        assert_eq!(table[id].account(), Some("alice"));
    }

    #[test]
    fn unattended_leaves_records_pending() {
        let mut table = MappingTable::new();
        let mut ingest = Ingestor::new(&mut table, None::<&mut ScriptedPrompter>);
        let id = ingest
            .register_identifier(Some("alice"), Path::new("Users/alice"), &sid(ALICE), Role::Owner)
            .unwrap();
        assert!(!table[id].is_defined());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn non_account_identifiers_are_dropped() {
        let mut table = MappingTable::new();
        let mut prompter = ScriptedPrompter::new(["1000"]);
        let mut ingest = Ingestor::new(&mut table, Some(&mut prompter));
        let system = sid("S-1-5-18");
        let id = ingest
            .register(None, Path::new("Windows"), system.as_bytes(), Role::Owner)
            .unwrap();
        assert_eq!(id, None);
        assert!(table.is_empty());
        assert!(prompter.asked().is_empty());
    }

    #[test]
    fn acl_principals_register_as_groups() {
        let descriptor = SecurityDescriptorBuilder::new()
            .allow(sid("S-1-5-18").as_bytes())
            .allow(sid(USERS).as_bytes())
            .allow(sid(ALICE).as_bytes())
            .build()
            .unwrap();
        let mut table = MappingTable::new();
        let mut prompter = ScriptedPrompter::new(["100", "101"]);
        let mut ingest = Ingestor::new(&mut table, Some(&mut prompter));
        let count = ingest
            .ingest_descriptor(
                Some("alice"),
                Path::new("Users/alice"),
                &descriptor,
                DescriptorKind::DiscretionaryAcl,
            )
            .unwrap();
        assert_eq!(count, 2);
        let records: Vec<_> = table.iter().map(|r| (r.sid(), r.owner(), r.group())).collect();
        assert_eq!(records, [(USERS, "", "100"), (ALICE, "", "101")]);
    }

    #[test]
    fn malformed_descriptor_is_reported() {
        let mut table = MappingTable::new();
        let mut ingest = Ingestor::new(&mut table, None::<&mut ScriptedPrompter>);
        let err = ingest
            .ingest_descriptor(None, Path::new("x"), &[1, 0, 0], DescriptorKind::Owner)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidDescriptor(_)), "{err}");
        assert!(!err.is_fatal());
    }
}

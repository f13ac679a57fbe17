//! Post-pass making the mapping usable: at least one user and one group.

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::mapping::{MappingRecord, MappingTable, RecordId};
use crate::prompt::ResolutionPrompter;
use crate::volume::DefaultIdentity;

/// What happened about the standard group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandardGroup {
    /// A group was already mapped.
    NotNeeded,
    /// A pending generic group now maps to the first owner's id.
    Promoted(RecordId),
    /// The generic group of the first owner's domain was added.
    Synthesized(RecordId),
    /// That generic group already had a mapping.
    AlreadyMapped(RecordId),
    /// The operator refused a standard group.
    Declined,
}

/// Changes made by [`sanitize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SanitizeReport {
    /// Record added for the current account when no owner was mapped.
    pub default_owner: Option<RecordId>,
    /// Outcome of the group check.
    pub standard_group: StandardGroup,
}

#[derive(Debug, Default)]
struct Census {
    owners: usize,
    group_only: usize,
    first_owner: Option<RecordId>,
    pending_generic_group: Option<RecordId>,
}

impl Census {
    fn of(table: &MappingTable) -> Self {
        let mut census = Self::default();
        for (id, record) in table.entries() {
            if record.is_defined() {
                if !record.owner().is_empty() {
                    census.owners += 1;
                    census.first_owner.get_or_insert(id);
                } else if !record.group().is_empty() {
                    census.group_only += 1;
                }
            } else if record.is_generic_group() {
                census.pending_generic_group.get_or_insert(id);
            }
        }
        census
    }
}

/// Ensures the table maps at least one owner and one group.
///
/// With no owner, the current account (`identity`) is mapped to a login
/// asked from the operator and put first. With no group-only record, and
/// unless the operator declines, a standard group is mapped to the first
/// owner's id: a pending generic group if one exists, else the generic group
/// derived from the first owner.
///
/// Without a prompter the standard group is accepted and no default owner can
/// be obtained.
///
/// # Errors
/// [`Error::NoOwnerResolved`] when no owner is mapped and none could be
/// obtained; the table is then left unchanged. [`Error::Prompt`] if the
/// operator could not be asked.
pub fn sanitize<P: ResolutionPrompter + ?Sized>(
    table: &mut MappingTable,
    mut prompter: Option<&mut P>,
    identity: Option<&DefaultIdentity>,
) -> Result<SanitizeReport> {
    let census = Census::of(table);
    let mut candidate = census.pending_generic_group;
    let mut default_owner = None;

    let first_owner = if let Some(first_owner) = census.first_owner {
        first_owner
    } else {
        let identity = identity.ok_or(Error::NoOwnerResolved)?;
        let login = match prompter.as_deref_mut() {
            Some(prompter) => prompter
                .ask_default_owner(identity)
                .map_err(Error::Prompt)?,
            None => None,
        };
        let login = login
            .as_deref()
            .map(str::trim)
            .filter(|login| !login.is_empty())
            .ok_or(Error::NoOwnerResolved)?;
        // A group already mapped for the current account is kept.
        let group = table
            .find(identity.sid.as_str())
            .map(|known| &table[known])
            .filter(|record| record.is_defined())
            .map_or_else(|| login.to_owned(), |record| record.group().to_owned());
        let id = table.prepend(MappingRecord::defined(
            identity.sid.clone(),
            login,
            group,
            Some(identity.account.name.clone()),
        ));
        info!(sid = %identity.sid, account = %identity.account, login, "current account mapped");
        if let Some(group) = table
            .entries()
            .find(|(_, record)| {
                !record.is_defined()
                    && record.is_generic_group()
                    && record.identifier().shares_domain(&identity.sid)
            })
            .map(|(group, _)| group)
        {
            candidate = Some(group);
        }
        default_owner = Some(id);
        id
    };

    let group_only = if default_owner.is_some() {
        Census::of(table).group_only
    } else {
        census.group_only
    };
    let standard_group = if group_only > 0 {
        StandardGroup::NotNeeded
    } else if !prompter
        .as_deref_mut()
        .map_or(Ok(true), |prompter| prompter.accept_standard_group())
        .map_err(Error::Prompt)?
    {
        debug!("standard group declined");
        StandardGroup::Declined
    } else {
        standard_group(table, first_owner, candidate)?
    };
    Ok(SanitizeReport {
        default_owner,
        standard_group,
    })
}

fn standard_group(
    table: &mut MappingTable,
    first_owner: RecordId,
    candidate: Option<RecordId>,
) -> Result<StandardGroup> {
    let owner = &table[first_owner];
    let gid = owner.owner().to_owned();
    if let Some(candidate) = candidate {
        table.resolve(candidate, "", gid);
        info!(sid = table[candidate].sid(), "generic group mapped");
        return Ok(StandardGroup::Promoted(candidate));
    }

    let group = owner.identifier().to_generic_group()?;
    if let Some(known) = table.find(group.as_str()) {
        if table[known].is_defined() {
            return Ok(StandardGroup::AlreadyMapped(known));
        }
        table.resolve(known, "", gid);
        info!(sid = %group, "generic group mapped");
        return Ok(StandardGroup::Promoted(known));
    }
    info!(sid = %group, "generic group added");
    let id = table.prepend(MappingRecord::defined(group, "", gid, None));
    Ok(StandardGroup::Synthesized(id))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Unwrap is not an issue in test")]
mod tests {
    use super::*;
    use crate::prompt::ScriptedPrompter;
    use crate::sid::SecurityIdentifier;
    use crate::sid::test::arb_account_sid;
    use crate::volume::DomainAndName;
    use proptest::prelude::*;

    fn sid(text: &str) -> SecurityIdentifier {
        text.parse().unwrap()
    }

    fn identity() -> DefaultIdentity {
        DefaultIdentity {
            sid: sid("S-1-5-21-1-2-3-1001"),
            account: DomainAndName::new("HOST", "alice"),
        }
    }

    fn pending(table: &mut MappingTable, text: &str) -> RecordId {
        table.find_or_create_pending(&sid(text), None).0
    }

    fn lines(table: &MappingTable) -> Vec<String> {
        table
            .iter()
            .map(|r| format!("{}:{}:{}", r.owner(), r.group(), r.sid()))
            .collect()
    }

    #[test]
    fn no_owner_and_no_identity_fails_untouched() {
        let mut table = MappingTable::new();
        pending(&mut table, "S-1-5-21-1-2-3-513");
        let mut prompter = ScriptedPrompter::default().with_default_owner("1000");
        let before = lines(&table);
        let err = sanitize(&mut table, Some(&mut prompter), None).unwrap_err();
        assert!(matches!(err, Error::NoOwnerResolved), "{err}");
        assert_eq!(lines(&table), before);
    }

    #[test]
    fn no_owner_and_blank_login_fails_untouched() {
        let mut table = MappingTable::new();
        pending(&mut table, "S-1-5-21-1-2-3-1002");
        let mut prompter = ScriptedPrompter::default().with_default_owner("  ");
        let err = sanitize(&mut table, Some(&mut prompter), Some(&identity())).unwrap_err();
        assert!(matches!(err, Error::NoOwnerResolved), "{err}");
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn unattended_without_owner_fails() {
        let mut table = MappingTable::new();
        let err = sanitize(&mut table, None::<&mut ScriptedPrompter>, Some(&identity()))
            .unwrap_err();
        assert!(matches!(err, Error::NoOwnerResolved), "{err}");
        assert!(table.is_empty());
    }

    #[test]
    fn default_owner_with_matching_generic_group() {
        let mut table = MappingTable::new();
        pending(&mut table, "S-1-5-21-9-9-9-513");
        pending(&mut table, "S-1-5-21-1-2-3-513");
        let mut prompter = ScriptedPrompter::default().with_default_owner("1000");
        let report = sanitize(&mut table, Some(&mut prompter), Some(&identity())).unwrap();
        assert!(report.default_owner.is_some());
        assert!(matches!(report.standard_group, StandardGroup::Promoted(_)));
        assert_eq!(
            lines(&table),
            [
                "1000:1000:S-1-5-21-1-2-3-1001",
                "::S-1-5-21-9-9-9-513",
                ":1000:S-1-5-21-1-2-3-513",
            ]
        );
        assert_eq!(table.iter().next().unwrap().account(), Some("alice"));
    }

    #[test]
    fn default_owner_already_pending_moves_first() {
        let mut table = MappingTable::new();
        pending(&mut table, "S-1-5-21-7-7-7-1005");
        let own = pending(&mut table, "S-1-5-21-1-2-3-1001");
        let mut prompter = ScriptedPrompter::default().with_default_owner("1000");
        let report = sanitize(&mut table, Some(&mut prompter), Some(&identity())).unwrap();
        assert_eq!(report.default_owner, Some(own));
        assert_eq!(
            lines(&table),
            [
                ":1000:S-1-5-21-1-2-3-513",
                "1000:1000:S-1-5-21-1-2-3-1001",
                "::S-1-5-21-7-7-7-1005",
            ]
        );
    }

    #[test]
    fn default_owner_keeps_mapped_group() {
        let mut table = MappingTable::new();
        let own = pending(&mut table, "S-1-5-21-1-2-3-1001");
        table.resolve(own, "", "100");
        pending(&mut table, "S-1-5-21-1-2-3-1002");
        let mut prompter = ScriptedPrompter::default().with_default_owner("1000");
        let report = sanitize(&mut table, Some(&mut prompter), Some(&identity())).unwrap();
        assert_eq!(report.default_owner, Some(own));
        assert_eq!(table[own].owner(), "1000");
        assert_eq!(table[own].group(), "100");
        let StandardGroup::Synthesized(group) = report.standard_group else {
            unreachable!("standard group not synthesized");
        };
        assert_eq!(table[group].sid(), "S-1-5-21-1-2-3-513");
        assert_eq!(
            lines(&table),
            [
                ":1000:S-1-5-21-1-2-3-513",
                "1000:100:S-1-5-21-1-2-3-1001",
                "::S-1-5-21-1-2-3-1002",
            ]
        );
    }

    #[test]
    fn derived_group_is_prepended() {
        let mut table = MappingTable::new();
        let owner = pending(&mut table, "S-1-5-21-4-5-6-1010");
        table.resolve(owner, "1010", "1010");
        let report = sanitize(&mut table, None::<&mut ScriptedPrompter>, None).unwrap();
        let StandardGroup::Synthesized(group) = report.standard_group else {
            unreachable!("standard group not synthesized");
        };
        assert_eq!(table[group].sid(), "S-1-5-21-4-5-6-513");
        assert_eq!(
            lines(&table),
            [":1010:S-1-5-21-4-5-6-513", "1010:1010:S-1-5-21-4-5-6-1010"]
        );
    }

    #[test]
    fn declined_changes_nothing() {
        let mut table = MappingTable::new();
        let owner = pending(&mut table, "S-1-5-21-4-5-6-1010");
        table.resolve(owner, "1010", "1010");
        pending(&mut table, "S-1-5-21-4-5-6-513");
        let before = lines(&table);
        let mut prompter = ScriptedPrompter::default().with_confirmations([false]);
        let report = sanitize(&mut table, Some(&mut prompter), None).unwrap();
        assert_eq!(report.standard_group, StandardGroup::Declined);
        assert_eq!(lines(&table), before);
    }

    #[test]
    fn existing_group_needs_nothing() {
        let mut table = MappingTable::new();
        let owner = pending(&mut table, "S-1-5-21-4-5-6-1010");
        table.resolve(owner, "1010", "1010");
        let group = pending(&mut table, "S-1-5-21-4-5-6-1011");
        table.resolve(group, "", "100");
        let report = sanitize(&mut table, None::<&mut ScriptedPrompter>, None).unwrap();
        assert_eq!(report.standard_group, StandardGroup::NotNeeded);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn derived_group_already_mapped_as_owner() {
        let mut table = MappingTable::new();
        let owner = pending(&mut table, "S-1-5-21-4-5-6-1010");
        table.resolve(owner, "1010", "1010");
        let users = pending(&mut table, "S-1-5-21-4-5-6-513");
        table.resolve(users, "100", "100");
        let report = sanitize(&mut table, None::<&mut ScriptedPrompter>, None).unwrap();
        assert_eq!(report.standard_group, StandardGroup::AlreadyMapped(users));
        assert_eq!(table.len(), 2);
    }

    proptest! {
        #[test]
        fn guarantees_owner_and_group(
            records in prop::collection::vec((arb_account_sid(), 0u8..3), 0..20),
        ) {
            let mut table = MappingTable::new();
            for (sid, kind) in &records {
                let (id, _) = table.find_or_create_pending(sid, None);
                match kind {
                    1 => table.resolve(id, "1000", "1000"),
                    2 => table.resolve(id, "", "100"),
                    _ => {}
                }
            }
            let had_owner = table.iter().any(|r| r.is_defined() && !r.owner().is_empty());
            let before = lines(&table);
            let result = sanitize(&mut table, None::<&mut ScriptedPrompter>, None);
            prop_assert_eq!(result.is_ok(), had_owner);
            if had_owner {
                prop_assert!(table.iter().any(|r| r.is_defined() && r.owner().is_empty()));
            } else {
                prop_assert_eq!(lines(&table), before);
            }
            let mut sids: Vec<_> = table.iter().map(MappingRecord::sid).collect();
            sids.sort_unstable();
            sids.dedup();
            prop_assert_eq!(sids.len(), table.len());
        }
    }
}

//! Bounded walk of a volume, feeding the security descriptors it meets to an
//! [`Ingestor`].
//!
//! Account profiles are visited first so that their owners are asked about
//! under the account name, then the remaining top-level directories.

use std::path::{Path, PathBuf};

use parsing::DescriptorKind;
use tracing::{debug, info, warn};

use crate::config::UsermapConfig;
use crate::error::{Error, Result};
use crate::ingest::Ingestor;
use crate::prompt::ResolutionPrompter;
use crate::volume::{DirEntry, VolumeSession};

/// Counters of one volume scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    /// Account directories found in profile directories.
    pub accounts: usize,
    /// Files and directories whose descriptors were examined.
    pub examined: usize,
    /// Identifiers that reached the mapping table.
    pub identifiers: usize,
    /// Descriptors or listings that could not be read or parsed.
    pub skipped: usize,
}

/// Walks a [`VolumeSession`] the way the mapping tool scans a system drive.
#[derive(Debug, Clone, Copy)]
pub struct DirectoryWalker<'c> {
    config: &'c UsermapConfig,
}

impl<'c> DirectoryWalker<'c> {
    /// Walker using the profile directories, reserved prefix and depth of
    /// `config`.
    #[inline]
    #[must_use]
    pub const fn new(config: &'c UsermapConfig) -> Self {
        Self { config }
    }

    fn is_scanned(&self, entry: &DirEntry) -> bool {
        entry.name != "."
            && entry.name != ".."
            && !entry.is_special
            && !entry.name.starts_with(&self.config.reserved_prefix)
    }

    fn is_profile_dir(&self, entry: &DirEntry) -> bool {
        entry.is_directory && self.config.profile_dirs.contains(&entry.name)
    }

    fn list<S: VolumeSession + ?Sized>(
        &self,
        session: &S,
        dir: &Path,
        stats: &mut ScanStats,
    ) -> Vec<DirEntry> {
        match session.list_entries(dir) {
            Ok(entries) => entries
                .into_iter()
                .filter(|entry| self.is_scanned(entry))
                .collect(),
            Err(err) => {
                debug!(dir = %dir.display(), error = %err, "directory not listed");
                stats.skipped += 1;
                Vec::new()
            }
        }
    }

    /// Scans the volume behind `session`.
    ///
    /// Unreadable or malformed descriptors are logged and skipped.
    ///
    /// # Errors
    /// Only errors that end the run, such as [`Error::Prompt`].
    pub fn scan<S, P>(&self, session: &S, ingest: &mut Ingestor<'_, P>) -> Result<ScanStats>
    where
        S: VolumeSession + ?Sized,
        P: ResolutionPrompter + ?Sized,
    {
        let mut stats = ScanStats::default();
        let root = PathBuf::new();
        let top = self.list(session, &root, &mut stats);

        for entry in top.iter().filter(|entry| self.is_profile_dir(entry)) {
            let profiles = root.join(&entry.name);
            debug!(dir = %profiles.display(), "searching account profiles");
            for account in self.list(session, &profiles, &mut stats) {
                if !account.is_directory {
                    continue;
                }
                stats.accounts += 1;
                let home = profiles.join(&account.name);
                let name = Some(account.name.as_str());
                self.examine(session, ingest, name, &home, true, &mut stats)?;
                let levels = self.config.scan_levels.saturating_sub(1);
                self.walk(session, ingest, name, &home, levels, &mut stats)?;
            }
        }

        debug!("searching other directories");
        for entry in top.iter().filter(|entry| !self.is_profile_dir(entry)) {
            let path = root.join(&entry.name);
            self.examine(session, ingest, None, &path, false, &mut stats)?;
            if entry.is_directory && self.config.scan_levels > 0 {
                self.walk(
                    session,
                    ingest,
                    None,
                    &path,
                    self.config.scan_levels - 1,
                    &mut stats,
                )?;
            }
        }
        info!(
            accounts = stats.accounts,
            examined = stats.examined,
            identifiers = stats.identifiers,
            skipped = stats.skipped,
            "scan complete"
        );
        Ok(stats)
    }

    /// Examines every entry of `dir`, descending while `levels` remain.
    fn walk<S, P>(
        &self,
        session: &S,
        ingest: &mut Ingestor<'_, P>,
        account: Option<&str>,
        dir: &Path,
        levels: u32,
        stats: &mut ScanStats,
    ) -> Result<()>
    where
        S: VolumeSession + ?Sized,
        P: ResolutionPrompter + ?Sized,
    {
        for entry in self.list(session, dir, stats) {
            let path = dir.join(&entry.name);
            self.examine(session, ingest, account, &path, false, stats)?;
            if entry.is_directory && levels > 0 {
                self.walk(session, ingest, account, &path, levels - 1, stats)?;
            }
        }
        Ok(())
    }

    /// Registers the owner and group of `path`, and the principals of its
    /// discretionary ACL when `with_acl` is set.
    fn examine<S, P>(
        &self,
        session: &S,
        ingest: &mut Ingestor<'_, P>,
        account: Option<&str>,
        path: &Path,
        with_acl: bool,
        stats: &mut ScanStats,
    ) -> Result<()>
    where
        S: VolumeSession + ?Sized,
        P: ResolutionPrompter + ?Sized,
    {
        stats.examined += 1;
        let kinds: &[DescriptorKind] = if with_acl {
            &[
                DescriptorKind::Owner,
                DescriptorKind::Group,
                DescriptorKind::DiscretionaryAcl,
            ]
        } else {
            &[DescriptorKind::Owner, DescriptorKind::Group]
        };
        for &kind in kinds {
            let descriptor = match session.security_descriptor(path, kind) {
                Ok(Some(descriptor)) => descriptor,
                Ok(None) => {
                    debug!(path = %path.display(), %kind, "no descriptor");
                    continue;
                }
                Err(source) => {
                    let err = Error::DescriptorUnavailable {
                        path: path.to_path_buf(),
                        kind,
                        source,
                    };
                    debug!(error = %err, "skipped");
                    stats.skipped += 1;
                    continue;
                }
            };
            match ingest.ingest_descriptor(account, path, &descriptor, kind) {
                Ok(count) => stats.identifiers += count,
                Err(err) if !err.is_fatal() => {
                    warn!(path = %path.display(), %kind, error = %err, "malformed descriptor skipped");
                    stats.skipped += 1;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

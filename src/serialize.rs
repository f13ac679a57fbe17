//! Rendering and writing of the mapping file.
//!
//! The file starts with a `# <banner>` line followed by one
//! `<uid>:<gid>:<sid>` line per resolved record. Records mapping only a user
//! or only a group come first, then records mapping both, each group in table
//! order.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::UsermapConfig;
use crate::error::{Error, Result};
use crate::mapping::{MappingRecord, MappingTable};
use crate::volume::DefaultIdentity;

/// Mapping file contents, with the records left out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    /// Text of the mapping file.
    pub text: String,
    /// Canonical SIDs of the pending records, in table order.
    pub undecided: Vec<String>,
}

fn push_line(text: &mut String, record: &MappingRecord) {
    text.push_str(&format!(
        "{}:{}:{}\n",
        record.owner(),
        record.group(),
        record.sid()
    ));
}

/// Renders `table` under a `# banner` line.
#[must_use]
pub fn render(table: &MappingTable, banner: &str) -> Rendered {
    let mut text = format!("# {banner}\n");
    let defined = || table.iter().filter(|record| record.is_defined());
    for record in defined().filter(|r| r.owner().is_empty() != r.group().is_empty()) {
        push_line(&mut text, record);
    }
    for record in defined().filter(|r| !r.owner().is_empty() && !r.group().is_empty()) {
        push_line(&mut text, record);
    }
    let undecided = table
        .undecided()
        .map(|record| record.sid().to_owned())
        .collect();
    Rendered { text, undecided }
}

/// Template mapping for a single account, printed when nobody can answer
/// questions: the operator replaces `user` and `group` by hand.
///
/// # Errors
/// [`Error::InvalidSid`] if the identity has no sub-authority.
pub fn render_minimal(identity: &DefaultIdentity, banner: &str) -> Result<String> {
    let group = identity.sid.to_generic_group()?;
    Ok(format!(
        "# {banner}\n\
         # For Windows account \"{}\" in domain \"{}\"\n\
         # Replace \"user\" and \"group\" hereafter by matching Linux login\n\
         user::{}\n\
         :group:{group}\n",
        identity.account.name, identity.account.domain, identity.sid,
    ))
}

/// Where the mapping file ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    /// File written.
    pub path: PathBuf,
    /// Set when the file was written at the volume root and has to be moved
    /// into the mapping directory by hand.
    pub relocate: bool,
    /// Canonical SIDs of the records left out, in table order.
    pub undecided: Vec<String>,
}

/// Writes mapping files as configured.
#[derive(Debug, Clone, Copy)]
pub struct MappingWriter<'c> {
    config: &'c UsermapConfig,
}

impl<'c> MappingWriter<'c> {
    /// Writer for `config`'s file names and banner.
    #[inline]
    #[must_use]
    pub const fn new(config: &'c UsermapConfig) -> Self {
        Self { config }
    }

    /// Writes `table` under `root`, in the mapping directory when possible,
    /// otherwise at `root` itself. A previous file is kept as a backup.
    ///
    /// # Errors
    /// [`Error::WriteFailure`] when neither location can be written.
    pub fn write(&self, table: &MappingTable, root: &Path) -> Result<WriteOutcome> {
        let Rendered { text, undecided } = render(table, &self.config.banner);
        let map_dir = root.join(&self.config.map_dir);
        let primary = map_dir.join(&self.config.map_file);

        let first_attempt = ensure_dir(&map_dir).and_then(|()| self.replace(&primary, &text));
        let Err(first_err) = first_attempt else {
            info!(path = %primary.display(), "mapping file written");
            return Ok(WriteOutcome {
                path: primary,
                relocate: false,
                undecided,
            });
        };

        let fallback = root.join(&self.config.map_file);
        warn!(
            path = %primary.display(),
            error = %first_err,
            "could not write mapping file, trying the volume root"
        );
        match self.replace(&fallback, &text) {
            Ok(()) => {
                warn!(
                    path = %fallback.display(),
                    dir = %self.config.map_dir.display(),
                    "mapping file has to be moved into its directory"
                );
                Ok(WriteOutcome {
                    path: fallback,
                    relocate: true,
                    undecided,
                })
            }
            Err(source) => Err(Error::WriteFailure {
                primary,
                fallback,
                source,
            }),
        }
    }

    fn replace(&self, path: &Path, text: &str) -> io::Result<()> {
        if fs::symlink_metadata(path).is_ok() {
            if let Err(err) = self.backup(path) {
                warn!(error = %err, "previous mapping file overwritten");
            }
        }
        fs::write(path, text)
    }

    fn backup(&self, path: &Path) -> Result<PathBuf> {
        let mut name = OsString::from(path.as_os_str());
        name.push(&self.config.backup_suffix);
        let backup = PathBuf::from(name);
        let moved = match fs::remove_file(&backup) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
            _ => fs::rename(path, &backup),
        };
        moved.map_err(|source| Error::BackupFailure {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %backup.display(), "previous mapping file kept");
        Ok(backup)
    }
}

fn ensure_dir(dir: &Path) -> io::Result<()> {
    if dir.is_dir() {
        return Ok(());
    }
    info!(dir = %dir.display(), "creating mapping directory");
    fs::create_dir(dir)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Unwrap is not an issue in test")]
mod tests {
    use super::*;
    use crate::sid::SecurityIdentifier;
    use crate::volume::DomainAndName;

    fn sid(text: &str) -> SecurityIdentifier {
        text.parse().unwrap()
    }

    fn table() -> MappingTable {
        let mut table = MappingTable::new();
        for (text, owner, group) in [
            ("S-1-5-21-1-2-3-1001", "1000", "1000"),
            ("S-1-5-21-1-2-3-1002", "", ""),
            ("S-1-5-21-1-2-3-513", "", "100"),
            ("S-1-5-21-1-2-3-1003", "1003", "1003"),
            ("S-1-5-21-1-2-3-1004", "", ""),
            ("S-1-5-21-1-2-3-1005", "1005", ""),
        ] {
            let (id, _) = table.find_or_create_pending(&sid(text), None);
            table.resolve(id, owner, group);
        }
        table
    }

    #[test]
    fn single_mappings_come_first() {
        let rendered = render(&table(), "test");
        assert_eq!(
            rendered.text,
            "# test\n\
             :100:S-1-5-21-1-2-3-513\n\
             1005::S-1-5-21-1-2-3-1005\n\
             1000:1000:S-1-5-21-1-2-3-1001\n\
             1003:1003:S-1-5-21-1-2-3-1003\n"
        );
        assert_eq!(
            rendered.undecided,
            ["S-1-5-21-1-2-3-1002", "S-1-5-21-1-2-3-1004"]
        );
    }

    #[test]
    fn minimal_template() {
        let identity = DefaultIdentity {
            sid: sid("S-1-5-21-1-2-3-1001"),
            account: DomainAndName::new("HOST", "alice"),
        };
        let text = render_minimal(&identity, "test").unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[1], "# For Windows account \"alice\" in domain \"HOST\"");
        assert_eq!(lines[3], "user::S-1-5-21-1-2-3-1001");
        assert_eq!(lines[4], ":group:S-1-5-21-1-2-3-513");
    }

    #[test]
    fn writes_into_map_dir_with_backup() {
        let root = tempfile::tempdir().unwrap();
        let config = UsermapConfig::default();
        let writer = MappingWriter::new(&config);
        let first = writer.write(&table(), root.path()).unwrap();
        assert!(!first.relocate);
        assert_eq!(first.path, root.path().join(".NTFS-3G/UserMapping"));

        let backup = root.path().join(".NTFS-3G/UserMapping.bak");
        fs::write(&backup, "stale").unwrap();
        let previous = fs::read_to_string(&first.path).unwrap();
        let second = writer.write(&MappingTable::new(), root.path()).unwrap();
        assert_eq!(fs::read_to_string(&backup).unwrap(), previous);
        assert_eq!(
            fs::read_to_string(&second.path).unwrap(),
            format!("# {}\n", config.banner)
        );
    }

    #[test]
    fn falls_back_to_root() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join(".NTFS-3G"), "not a directory").unwrap();
        let config = UsermapConfig::default();
        let outcome = MappingWriter::new(&config)
            .write(&table(), root.path())
            .unwrap();
        assert!(outcome.relocate);
        assert_eq!(outcome.path, root.path().join("UserMapping"));
        assert_eq!(outcome.undecided.len(), 2);
    }

    #[test]
    fn reports_both_locations() {
        let root = tempfile::tempdir().unwrap();
        let missing = root.path().join("missing");
        let config = UsermapConfig::default();
        let err = MappingWriter::new(&config)
            .write(&table(), &missing)
            .unwrap_err();
        let Error::WriteFailure { primary, fallback, .. } = err else {
            unreachable!("expected a write failure");
        };
        assert_eq!(primary, missing.join(".NTFS-3G/UserMapping"));
        assert_eq!(fallback, missing.join("UserMapping"));
    }
}

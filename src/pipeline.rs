//! A whole mapping run: scan every volume, sanitize, write.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::UsermapConfig;
use crate::error::{Error, Result};
use crate::ingest::Ingestor;
use crate::mapping::MappingTable;
use crate::prompt::ResolutionPrompter;
use crate::sanitize::{SanitizeReport, sanitize};
use crate::serialize::{MappingWriter, WriteOutcome};
use crate::volume::{SecurityApi, SessionGuard};
use crate::walk::{DirectoryWalker, ScanStats};

/// Result of scanning one volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeReport {
    /// Volume as given.
    pub volume: PathBuf,
    /// Scan counters, `None` when the volume could not be opened.
    pub stats: Option<ScanStats>,
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// One entry per requested volume, in order.
    pub volumes: Vec<VolumeReport>,
    /// Changes made by the sanitizer.
    pub sanitize: SanitizeReport,
    /// Location of the mapping file.
    pub outcome: WriteOutcome,
    /// Final table.
    pub table: MappingTable,
}

/// Mapping tool over a [`SecurityApi`].
#[derive(Debug, Clone)]
pub struct Usermap<A> {
    api: A,
    config: UsermapConfig,
}

impl<A: SecurityApi> Usermap<A> {
    /// Tool reading volumes through `api`.
    #[inline]
    pub const fn new(api: A, config: UsermapConfig) -> Self {
        Self { api, config }
    }

    /// The volume backend.
    #[inline]
    pub const fn api(&self) -> &A {
        &self.api
    }

    /// The settings in use.
    #[inline]
    pub const fn config(&self) -> &UsermapConfig {
        &self.config
    }

    /// Scans `volumes` one after the other, then writes the mapping under
    /// `output_root`.
    ///
    /// A volume that cannot be opened is skipped; the run fails only when no
    /// volume at all could be opened. Each session is closed before the next
    /// volume is opened, whether its scan succeeded or not.
    ///
    /// # Errors
    /// [`Error::CollaboratorUnavailable`] when no volume opens, then any error
    /// of the scan, [`sanitize`] or [`MappingWriter::write`].
    pub fn run<P>(
        &self,
        volumes: &[PathBuf],
        output_root: &Path,
        mut prompter: Option<&mut P>,
    ) -> Result<RunReport>
    where
        P: ResolutionPrompter + ?Sized,
    {
        let mut table = MappingTable::new();
        let mut reports = Vec::with_capacity(volumes.len());
        let mut unavailable = None;
        let walker = DirectoryWalker::new(&self.config);

        for volume in volumes {
            if let Some(prompter) = prompter.as_deref_mut() {
                prompter
                    .scanning(volume, self.config.scan_levels)
                    .map_err(Error::Prompt)?;
            }
            let guard = match SessionGuard::open(&self.api, volume) {
                Ok(guard) => guard,
                Err(source) => {
                    let err = Error::CollaboratorUnavailable {
                        volume: volume.clone(),
                        source,
                    };
                    warn!(error = %err, "volume skipped");
                    unavailable.get_or_insert(err);
                    reports.push(VolumeReport {
                        volume: volume.clone(),
                        stats: None,
                    });
                    continue;
                }
            };
            let mut ingest = Ingestor::new(&mut table, prompter.as_deref_mut());
            let stats = walker.scan(&guard, &mut ingest)?;
            if let Err(err) = guard.close() {
                warn!(volume = %volume.display(), error = %err, "could not close volume");
            }
            reports.push(VolumeReport {
                volume: volume.clone(),
                stats: Some(stats),
            });
        }
        if let Some(err) = unavailable
            && reports.iter().all(|report| report.stats.is_none())
        {
            return Err(err);
        }

        let identity = self.api.default_identity();
        let sanitized = sanitize(&mut table, prompter, identity.as_ref())?;
        let outcome = MappingWriter::new(&self.config).write(&table, output_root)?;
        info!(
            path = %outcome.path.display(),
            records = table.len(),
            undecided = outcome.undecided.len(),
            "mapping done"
        );
        Ok(RunReport {
            volumes: reports,
            sanitize: sanitized,
            outcome,
            table,
        })
    }
}

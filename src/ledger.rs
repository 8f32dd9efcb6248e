use std::{
    collections::BTreeSet,
    fs::{File, OpenOptions},
    io::{BufRead, BufReader, ErrorKind, Write},
    path::Path,
    sync::Mutex,
};

use miette::{Context, IntoDiagnostic, Result};
use tracing::debug;

/// Tracks which items have been seen this run and across runs.
///
/// The session set is the in-memory dedup barrier for one invocation; the
/// archive set is read once from a line-oriented file at startup and only
/// ever appended to afterwards. An identifier found in either set is never
/// scheduled again.
pub struct Ledger {
    session: Mutex<BTreeSet<String>>,
    archive: BTreeSet<String>,
    archive_file: Option<Mutex<File>>,
}

impl Ledger {
    /// Load the archive set when a path is configured.
    ///
    /// A missing archive file is a normal first run; any other read failure
    /// on a configured path is fatal.
    pub fn init(archive_path: Option<&Path>) -> Result<Self> {
        let mut archive = BTreeSet::new();
        let mut archive_file = None;

        if let Some(path) = archive_path {
            match File::open(path) {
                Ok(file) => {
                    for line in BufReader::new(file).lines() {
                        let line = line
                            .into_diagnostic()
                            .wrap_err_with(|| format!("Could not read archive '{}'", path.display()))?;
                        let id = line.trim();
                        if !id.is_empty() {
                            archive.insert(id.to_string());
                        }
                    }
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e).into_diagnostic().wrap_err_with(|| {
                        format!("Could not read archive '{}'", path.display())
                    })
                }
            }

            debug!("{} items in the archive", archive.len());

            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .into_diagnostic()
                .wrap_err_with(|| format!("Could not open archive '{}'", path.display()))?;
            archive_file = Some(Mutex::new(file));
        }

        Ok(Self {
            session: Mutex::new(BTreeSet::new()),
            archive,
            archive_file,
        })
    }

    /// Atomic check-and-insert against the session set.
    ///
    /// Returns true (without mutating) when the id was already seen this
    /// run, false after recording it as seen.
    pub fn check_session(&self, id: &str) -> bool {
        let mut session = self.session.lock().unwrap();
        !session.insert(id.to_string())
    }

    /// Membership test against the run-immutable archive set.
    pub fn in_archive(&self, id: &str) -> bool {
        self.archive.contains(id)
    }

    /// Append one identifier line to the archive file.
    ///
    /// Writers are serialized through the file lock so concurrent appends
    /// can never interleave partial lines.
    pub fn append(&self, id: &str) -> Result<()> {
        if let Some(file) = &self.archive_file {
            let mut file = file.lock().unwrap();
            writeln!(file, "{id}")
                .into_diagnostic()
                .wrap_err("Could not append to archive")?;
        }
        Ok(())
    }

    pub fn archive_len(&self) -> usize {
        self.archive.len()
    }
}

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

/// Append-only record of terminal outcomes, one line per file.
pub const LEDGER_FILENAME: &str = ".camstamp-ledger.log";

/// Human-readable run summary, rewritten atomically after every update.
pub const SUMMARY_FILENAME: &str = ".camstamp-summary.txt";

/// Terminal classification of one input file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerStatus {
    Processed,
    Failed,
}

impl std::fmt::Display for LedgerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            LedgerStatus::Processed => "processed",
            LedgerStatus::Failed => "failed",
        })
    }
}

impl FromStr for LedgerStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "processed" => Ok(LedgerStatus::Processed),
            "failed" => Ok(LedgerStatus::Failed),
            _ => Err(()),
        }
    }
}

struct StoreInner {
    ledger: File,
    // First terminal status per path string; later duplicates are ignored.
    finalized: HashMap<String, LedgerStatus>,
    processed: u64,
    failed: u64,
}

/// Durable progress for a batch directory.
///
/// The ledger is the source of truth for resume: a file whose exact path
/// string appears here has reached a terminal outcome and is never handed to
/// the pipeline again. Entries are appended and flushed before the outcome is
/// reported, so an interrupted run can at worst re-process the file that was
/// in flight, never lose a recorded one.
pub struct ProgressStore {
    dir: PathBuf,
    inner: Mutex<StoreInner>,
}

impl ProgressStore {
    /// Open the store in `dir`, replaying any existing ledger.
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("cannot create ledger directory: {}", dir.display()))?;

        let ledger_path = dir.join(LEDGER_FILENAME);
        let mut finalized = HashMap::new();
        let mut processed = 0u64;
        let mut failed = 0u64;

        if ledger_path.exists() {
            let text = fs::read_to_string(&ledger_path)
                .with_context(|| format!("cannot read ledger: {}", ledger_path.display()))?;
            for (lineno, line) in text.lines().enumerate() {
                if line.is_empty() {
                    continue;
                }
                match parse_line(line) {
                    Some((path, status)) => {
                        if finalized.insert(path, status).is_none() {
                            match status {
                                LedgerStatus::Processed => processed += 1,
                                LedgerStatus::Failed => failed += 1,
                            }
                        }
                    }
                    None => warn!(lineno = lineno + 1, "skipping malformed ledger line"),
                }
            }
            info!(
                entries = finalized.len(),
                processed, failed, "resumed from existing ledger"
            );
        }

        let ledger = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&ledger_path)
            .with_context(|| format!("cannot open ledger: {}", ledger_path.display()))?;

        Ok(Self {
            dir: dir.to_path_buf(),
            inner: Mutex::new(StoreInner {
                ledger,
                finalized,
                processed,
                failed,
            }),
        })
    }

    /// Whether `path` already has a terminal outcome on record.
    pub fn is_finalized(&self, path: &Path) -> bool {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.finalized.contains_key(&path.display().to_string())
    }

    /// Record a terminal outcome, flushed to disk before returning.
    ///
    /// A path that is already finalized keeps its first status; the call is
    /// a no-op then.
    pub fn record(&self, path: &Path, status: LedgerStatus) -> Result<()> {
        let key = path.display().to_string();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.finalized.contains_key(&key) {
            return Ok(());
        }

        let line = format!("{key}\t{status}\t{}\n", Utc::now().to_rfc3339());
        inner
            .ledger
            .write_all(line.as_bytes())
            .context("cannot append ledger entry")?;
        inner.ledger.flush().context("cannot flush ledger")?;

        inner.finalized.insert(key, status);
        match status {
            LedgerStatus::Processed => inner.processed += 1,
            LedgerStatus::Failed => inner.failed += 1,
        }
        Ok(())
    }

    /// Cumulative (processed, failed) counts, replayed entries included.
    pub fn counts(&self) -> (u64, u64) {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        (inner.processed, inner.failed)
    }

    /// Rewrite the summary file via a temporary sibling and rename, so a
    /// crash mid-write never leaves a truncated summary. The store lock is
    /// held for the whole rewrite, serializing concurrent workers.
    pub fn write_summary(
        &self,
        last_batch_size: usize,
        remaining: u64,
        last_location: Option<&str>,
    ) -> Result<()> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let (processed, failed) = (inner.processed, inner.failed);
        let mut body = String::new();
        body.push_str(&format!("processed={processed}\n"));
        body.push_str(&format!("failed={failed}\n"));
        body.push_str(&format!("remaining={remaining}\n"));
        body.push_str(&format!("last_batch_size={last_batch_size}\n"));
        body.push_str(&format!("last_location={}\n", last_location.unwrap_or("")));
        body.push_str(&format!("last_update={}\n", Utc::now().to_rfc3339()));

        let final_path = self.dir.join(SUMMARY_FILENAME);
        let temp_path = self.dir.join(format!("{SUMMARY_FILENAME}.tmp"));
        fs::write(&temp_path, body)
            .with_context(|| format!("cannot write summary: {}", temp_path.display()))?;
        fs::rename(&temp_path, &final_path)
            .with_context(|| format!("cannot move summary into place: {}", final_path.display()))?;
        Ok(())
    }

    /// Delete the ledger and summary in `dir`, forgetting all progress.
    pub fn reset(dir: &Path) -> Result<()> {
        for name in [LEDGER_FILENAME, SUMMARY_FILENAME] {
            let path = dir.join(name);
            match fs::remove_file(&path) {
                Ok(()) => info!(path = %path.display(), "removed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("cannot remove {}", path.display()));
                }
            }
        }
        Ok(())
    }
}

fn parse_line(line: &str) -> Option<(String, LedgerStatus)> {
    let mut parts = line.splitn(3, '\t');
    let path = parts.next()?;
    let status = parts.next()?.parse().ok()?;
    let recorded_at = parts.next()?;
    DateTime::parse_from_rfc3339(recorded_at).ok()?;
    if path.is_empty() {
        return None;
    }
    Some((path.to_string(), status))
}

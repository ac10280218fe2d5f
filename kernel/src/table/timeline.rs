//! The commit timeline of a table.
//!
//! Every successful write adds one commit file `.timeline/<instant>.commit.json`, where the
//! instant is a zero-padded, strictly increasing sequence number. The commit file is written
//! last: data files that no commit references are not part of the table.
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::{Error, LayoutResult};

/// Directory under the table root that holds the commit files.
pub const TIMELINE_DIR: &str = ".timeline";

/// How many characters an instant has in a commit file name
const INSTANT_LEN: usize = 20;

const COMMIT_SUFFIX: &str = ".commit.json";

/// Sequence number of a commit.
pub type Instant = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WriteOperation {
    /// The commit replaces every file group of the table.
    Overwrite,
    /// The commit adds new file groups and new slices of existing ones.
    Upsert,
}

/// One data file a commit wrote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteStat {
    pub partition: String,
    pub file_id: String,
    /// Path of the data file relative to the table root.
    pub path: String,
    pub num_records: u64,
    pub num_inserts: u64,
    pub num_updates: u64,
    pub file_size: u64,
    /// Instant of the file slice this one replaces, if it rewrote an existing file group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_instant: Option<Instant>,
}

/// The content of a commit file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitInfo {
    pub instant: Instant,
    /// Milliseconds since the unix epoch at which the commit was written.
    pub timestamp: i64,
    pub operation: WriteOperation,
    pub table_name: String,
    pub record_key_field: String,
    pub ordering_field: String,
    pub partition_field: String,
    pub write_stats: Vec<WriteStat>,
}

impl CommitInfo {
    pub fn num_records(&self) -> u64 {
        self.write_stats.iter().map(|s| s.num_records).sum()
    }
}

pub(crate) fn timeline_dir(root: &Path) -> PathBuf {
    root.join(TIMELINE_DIR)
}

pub(crate) fn commit_file_name(instant: Instant) -> String {
    format!("{instant:0width$}{COMMIT_SUFFIX}", width = INSTANT_LEN)
}

/// Parse the instant out of a commit file name. Names that are not commit files at all return
/// `Ok(None)`; names that look like a commit file but have a malformed instant are an error.
pub(crate) fn parse_commit_file_name(name: &str) -> LayoutResult<Option<Instant>> {
    let Some(instant) = name.strip_suffix(COMMIT_SUFFIX) else {
        return Ok(None);
    };
    match instant.parse() {
        Ok(instant) if name.len() == INSTANT_LEN + COMMIT_SUFFIX.len() => Ok(Some(instant)),
        _ => Err(Error::invalid_timeline_path(name)),
    }
}

/// Read every commit of the table rooted at `root`, ordered by instant.
pub(crate) fn list_commits(root: &Path) -> LayoutResult<Vec<CommitInfo>> {
    let dir = timeline_dir(root);
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut commits = vec![];
    for entry in std::fs::read_dir(&dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(instant) = name.to_str().map(parse_commit_file_name).transpose()?.flatten()
        else {
            debug!(file = ?name, "skipping non-commit file in timeline");
            continue;
        };
        let commit: CommitInfo =
            serde_json::from_reader(BufReader::new(File::open(entry.path())?))?;
        if commit.instant != instant {
            return Err(Error::generic(format!(
                "Commit file {name:?} holds instant {}",
                commit.instant
            )));
        }
        commits.push(commit);
    }
    commits.sort_by_key(|commit| commit.instant);
    Ok(commits)
}

/// Publish `commit` into the timeline of the table at `root`.
///
/// The commit is written to a temporary file first and then renamed into place without replacing
/// an existing commit. A commit that already exists for the instant is
/// [`Error::FileAlreadyExists`].
pub(crate) fn write_commit(root: &Path, commit: &CommitInfo) -> LayoutResult<PathBuf> {
    let dir = timeline_dir(root);
    std::fs::create_dir_all(&dir)?;
    let path = dir.join(commit_file_name(commit.instant));

    let mut tmp_file = NamedTempFile::new_in(&dir)?;
    serde_json::to_writer(&mut tmp_file, commit)?;
    tmp_file.flush()?;
    tmp_file.persist_noclobber(&path).map_err(|e| {
        if e.error.kind() == std::io::ErrorKind::AlreadyExists {
            Error::FileAlreadyExists(path.to_string_lossy().to_string())
        } else {
            Error::IOError(e.error)
        }
    })?;
    Ok(path)
}

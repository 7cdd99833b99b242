//! Commit log records and parsing of `git log` output.

use anyhow::{Result, anyhow};
use chrono::DateTime;
use serde::{Deserialize, Serialize};

/// Field separator used in [`LOG_FORMAT`].
pub const FIELD_SEP: char = '\x1f';
/// Record separator used in [`LOG_FORMAT`].
pub const RECORD_SEP: char = '\x1e';
/// `git log --format` producing records parsed by [`parse_log`].
pub const LOG_FORMAT: &str = "%H%x1f%h%x1f%ct%x1f%s%x1e";

/// One commit as shown in the switch list and cached in project config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSummary {
    pub sha: String,
    pub short_sha: String,
    /// Committer time, unix seconds.
    pub timestamp: i64,
    pub subject: String,
}

impl CommitSummary {
    /// Committer time as RFC 3339 (UTC), or the raw number if out of range.
    pub fn committed_at(&self) -> String {
        format_timestamp(self.timestamp)
    }
}

/// Parse output of `git log --format=LOG_FORMAT`.
pub fn parse_log(output: &str) -> Result<Vec<CommitSummary>> {
    let mut commits = Vec::new();
    for record in output.split(RECORD_SEP) {
        let record = record.trim_matches(['\n', '\r']);
        if record.trim().is_empty() {
            continue;
        }
        commits.push(parse_record(record)?);
    }
    Ok(commits)
}

fn parse_record(record: &str) -> Result<CommitSummary> {
    let mut fields = record.splitn(4, FIELD_SEP);
    let (Some(sha), Some(short_sha), Some(timestamp), Some(subject)) =
        (fields.next(), fields.next(), fields.next(), fields.next())
    else {
        return Err(anyhow!("unexpected git log record: '{record}'"));
    };
    let sha = sha.trim();
    if sha.is_empty() || !sha.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(anyhow!("unexpected commit sha: '{sha}'"));
    }
    let timestamp = timestamp
        .trim()
        .parse::<i64>()
        .map_err(|err| anyhow!("bad commit timestamp '{timestamp}': {err}"))?;
    Ok(CommitSummary {
        sha: sha.to_string(),
        short_sha: short_sha.trim().to_string(),
        timestamp,
        subject: subject.trim().to_string(),
    })
}

/// Render unix seconds as RFC 3339 in UTC.
pub fn format_timestamp(secs: i64) -> String {
    match DateTime::from_timestamp(secs, 0) {
        Some(at) => at.to_rfc3339(),
        None => secs.to_string(),
    }
}

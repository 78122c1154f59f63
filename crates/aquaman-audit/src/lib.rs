//! Tamper-evident, hash-chained, append-only audit log.
//!
//! Disk layout, one `AuditLog` per `log_dir`:
//!
//! ```text
//! <log_dir>/
//!   current.ndjson
//!   archive/<yyyymmddThhmmssZ>-<first_id>.ndjson
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use aquaman_core::crypto::{compute_chained_hash, generate_id};
use aquaman_core::error::AquamanError;
use aquaman_core::time_utils::{current_unix_timestamp, rfc3339_millis};

pub const ZERO_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

const DEFAULT_ROTATE_BYTES: u64 = 64 * 1024 * 1024;
const DEFAULT_ROTATE_AGE_S: u64 = 24 * 60 * 60;

/// What a call site supplies to [`AuditLog::append`]; the log fills in
/// `id`, `timestamp`, `previous_hash` and `hash`.
#[derive(Debug, Clone)]
pub struct AuditEntryDraft {
    pub event: String,
    pub service: String,
    pub operation: String,
    pub success: bool,
    pub detail: Option<String>,
}

impl AuditEntryDraft {
    pub fn credential_access(service: impl Into<String>, success: bool) -> Self {
        Self {
            event: "credential_access".to_string(),
            service: service.into(),
            operation: "use".to_string(),
            success,
            detail: None,
        }
    }

    /// Recorded before the upstream connection is opened, so a crash
    /// mid-request still leaves a trail of the access attempt. `success` is
    /// not yet known at this point; the outcome is recorded separately by a
    /// later [`Self::credential_access`] entry once the response (or error)
    /// is in hand.
    pub fn credential_dispatch(service: impl Into<String>) -> Self {
        Self {
            event: "credential_access_dispatch".to_string(),
            service: service.into(),
            operation: "dispatch".to_string(),
            success: true,
            detail: None,
        }
    }
}

/// One chained, persisted log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub timestamp: String,
    pub previous_hash: String,
    pub hash: String,
    pub event: String,
    pub service: String,
    pub operation: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Result of [`AuditLog::verify`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    pub ok: bool,
    pub entry_count: usize,
    pub first_break_at: Option<usize>,
}

/// Canonical JSON: keys sorted lexicographically, no insignificant
/// whitespace, UTF-8. `serde_json::Map` is BTreeMap-backed unless the
/// `preserve_order` feature is enabled (it is not, here), so serializing a
/// `Value::Object` already produces sorted keys.
fn canonical_json(value: &impl Serialize) -> Result<String, AquamanError> {
    let as_value = serde_json::to_value(value)
        .map_err(|err| AquamanError::bad_input(format!("failed to encode audit entry: {err}")))?;
    serde_json::to_string(&as_value)
        .map_err(|err| AquamanError::bad_input(format!("failed to encode audit entry: {err}")))
}

#[derive(Serialize)]
struct EntryWithoutHash<'a> {
    id: &'a str,
    timestamp: &'a str,
    previous_hash: &'a str,
    event: &'a str,
    service: &'a str,
    operation: &'a str,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: &'a Option<String>,
}

struct SegmentCursor {
    last_hash: String,
    first_id: Option<String>,
    segment_started_at: u64,
}

/// Hash-chained append-only log over a directory of NDJSON segments.
pub struct AuditLog {
    log_dir: PathBuf,
    current_path: PathBuf,
    archive_dir: PathBuf,
    rotate_bytes: u64,
    rotate_age_s: u64,
    cursor: Mutex<SegmentCursor>,
}

impl AuditLog {
    pub fn open(log_dir: PathBuf) -> Result<Self, AquamanError> {
        Self::open_with_policy(log_dir, DEFAULT_ROTATE_BYTES, DEFAULT_ROTATE_AGE_S)
    }

    pub fn open_with_policy(log_dir: PathBuf, rotate_bytes: u64, rotate_age_s: u64) -> Result<Self, AquamanError> {
        fs::create_dir_all(&log_dir)
            .map_err(|err| AquamanError::io(format!("failed to create {}", log_dir.display()), err))?;
        let archive_dir = log_dir.join("archive");
        fs::create_dir_all(&archive_dir)
            .map_err(|err| AquamanError::io(format!("failed to create {}", archive_dir.display()), err))?;
        let current_path = log_dir.join("current.ndjson");

        let (last_hash, first_id) = last_hash_and_first_id(&current_path)?;
        let segment_started_at = segment_started_at(&current_path)?;

        Ok(Self {
            log_dir,
            current_path,
            archive_dir,
            rotate_bytes,
            rotate_age_s,
            cursor: Mutex::new(SegmentCursor { last_hash, first_id, segment_started_at }),
        })
    }

    /// Single critical section: take the lock, compute the chained hash,
    /// durably append, update the cursor, rotate if thresholds are crossed.
    /// On any write failure the entry is still returned — audit writes fail
    /// open, they never block the request they describe.
    pub fn append(&self, draft: AuditEntryDraft) -> AuditEntry {
        let mut cursor = self.cursor.lock().expect("audit cursor lock poisoned");

        let id = generate_id();
        let timestamp = rfc3339_millis();
        let previous_hash = cursor.last_hash.clone();

        let without_hash = EntryWithoutHash {
            id: &id,
            timestamp: &timestamp,
            previous_hash: &previous_hash,
            event: &draft.event,
            service: &draft.service,
            operation: &draft.operation,
            success: draft.success,
            detail: &draft.detail,
        };
        let hash = match canonical_json(&without_hash) {
            Ok(json) => compute_chained_hash(json.as_bytes(), &previous_hash),
            Err(err) => {
                tracing::error!(error = %err, "failed to canonicalize audit entry, writing with empty hash");
                String::new()
            }
        };

        let entry = AuditEntry {
            id,
            timestamp,
            previous_hash,
            hash: hash.clone(),
            event: draft.event,
            service: draft.service,
            operation: draft.operation,
            success: draft.success,
            detail: draft.detail,
        };

        if cursor.first_id.is_none() {
            cursor.first_id = Some(entry.id.clone());
        }

        if let Err(err) = self.append_to_segment(&entry) {
            tracing::error!(error = %err, "audit write failed, request is still served");
        } else {
            cursor.last_hash = hash;
            if let Err(err) = self.rotate_if_needed_locked(&mut cursor) {
                tracing::error!(error = %err, "audit rotation failed");
            }
        }

        entry
    }

    fn append_to_segment(&self, entry: &AuditEntry) -> Result<(), AquamanError> {
        let line = canonical_json(entry)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.current_path)
            .map_err(|err| AquamanError::io(format!("failed to open {}", self.current_path.display()), err))?;
        writeln!(file, "{line}")
            .map_err(|err| AquamanError::AuditWrite(format!("failed to append audit entry: {err}")))?;
        file.sync_data()
            .map_err(|err| AquamanError::AuditWrite(format!("failed to fsync audit segment: {err}")))?;
        Ok(())
    }

    pub fn rotate_if_needed(&self) -> Result<bool, AquamanError> {
        let mut cursor = self.cursor.lock().expect("audit cursor lock poisoned");
        self.rotate_if_needed_locked(&mut cursor)
    }

    fn rotate_if_needed_locked(&self, cursor: &mut SegmentCursor) -> Result<bool, AquamanError> {
        let size = match fs::metadata(&self.current_path) {
            Ok(metadata) => metadata.len(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(AquamanError::io(format!("failed to stat {}", self.current_path.display()), err)),
        };
        let age = current_unix_timestamp().saturating_sub(cursor.segment_started_at);
        if size < self.rotate_bytes && age < self.rotate_age_s {
            return Ok(false);
        }

        let Some(first_id) = cursor.first_id.clone() else {
            return Ok(false);
        };
        let archive_name = format!("{}-{first_id}.ndjson", rfc3339_compact(current_unix_timestamp()));
        let archive_path = self.archive_dir.join(archive_name);
        fs::rename(&self.current_path, &archive_path)
            .map_err(|err| AquamanError::io(format!("failed to rotate to {}", archive_path.display()), err))?;

        cursor.first_id = None;
        cursor.segment_started_at = current_unix_timestamp();
        Ok(true)
    }

    /// Reads the last `n` entries, tolerant of a truncated final line
    /// (crash between write and newline) in the current segment. Walks
    /// backwards into archives if the current segment has fewer than `n`.
    pub fn tail(&self, n: usize) -> Result<Vec<AuditEntry>, AquamanError> {
        let mut segments = self.archived_segments()?;
        segments.push(self.current_path.clone());

        let mut collected = Vec::new();
        for path in segments.into_iter().rev() {
            if collected.len() >= n {
                break;
            }
            let entries = read_entries_tolerant(&path)?;
            let mut reversed: Vec<AuditEntry> = entries.into_iter().rev().collect();
            collected.append(&mut reversed);
        }
        collected.truncate(n);
        collected.reverse();
        Ok(collected)
    }

    /// Streams every segment (archive, chronological, then current),
    /// recomputing each entry's hash and checking the chain.
    pub fn verify(&self) -> Result<VerifyReport, AquamanError> {
        let mut segments = self.archived_segments()?;
        segments.push(self.current_path.clone());

        let mut entry_count = 0usize;
        let mut first_break_at = None;
        let mut expected_previous_hash = ZERO_HASH.to_string();
        let mut seen_ids = std::collections::HashSet::new();
        let mut last_timestamp: Option<String> = None;

        for path in segments {
            for entry in read_entries_tolerant(&path)? {
                let index = entry_count;
                entry_count += 1;

                let without_hash = EntryWithoutHash {
                    id: &entry.id,
                    timestamp: &entry.timestamp,
                    previous_hash: &entry.previous_hash,
                    event: &entry.event,
                    service: &entry.service,
                    operation: &entry.operation,
                    success: entry.success,
                    detail: &entry.detail,
                };
                let recomputed = canonical_json(&without_hash)
                    .map(|json| compute_chained_hash(json.as_bytes(), &entry.previous_hash))
                    .unwrap_or_default();

                let chain_ok = entry.previous_hash == expected_previous_hash && recomputed == entry.hash;
                let id_unique = seen_ids.insert(entry.id.clone());
                let monotonic = match &last_timestamp {
                    Some(prev) => prev <= &entry.timestamp,
                    None => true,
                };

                if first_break_at.is_none() && (!chain_ok || !id_unique || !monotonic) {
                    first_break_at = Some(index);
                }

                expected_previous_hash = entry.hash.clone();
                last_timestamp = Some(entry.timestamp.clone());
            }
        }

        Ok(VerifyReport { ok: first_break_at.is_none(), entry_count, first_break_at })
    }

    fn archived_segments(&self) -> Result<Vec<PathBuf>, AquamanError> {
        let mut paths: Vec<PathBuf> = match fs::read_dir(&self.archive_dir) {
            Ok(entries) => entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .filter(|path| path.extension().map(|ext| ext == "ndjson").unwrap_or(false))
                .collect(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(AquamanError::io(format!("failed to read {}", self.archive_dir.display()), err)),
        };
        paths.sort();
        Ok(paths)
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }
}

/// `yyyymmddThhmmssZ`, matching the archive filename convention.
fn rfc3339_compact(unix_seconds: u64) -> String {
    let full = aquaman_core::time_utils::rfc3339_from_unix(unix_seconds);
    full.replace(['-', ':'], "").replace(".000Z", "Z")
}

fn read_entries_tolerant(path: &Path) -> Result<Vec<AuditEntry>, AquamanError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(path).map_err(|err| AquamanError::io(format!("failed to open {}", path.display()), err))?;
    let reader = BufReader::new(file);
    let mut entries = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(|err| AquamanError::io(format!("failed to read {}", path.display()), err))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<AuditEntry>(&line) {
            Ok(entry) => entries.push(entry),
            Err(_) => {
                // Tolerate a truncated final line (crash between write and
                // newline); verify() still counts it as a break via the
                // chain check on the next valid entry, never here.
                continue;
            }
        }
    }
    Ok(entries)
}

fn last_hash_and_first_id(current_path: &Path) -> Result<(String, Option<String>), AquamanError> {
    let entries = read_entries_tolerant(current_path)?;
    let first_id = entries.first().map(|entry| entry.id.clone());
    let last_hash = entries.last().map(|entry| entry.hash.clone()).unwrap_or_else(|| ZERO_HASH.to_string());
    Ok((last_hash, first_id))
}

fn segment_started_at(current_path: &Path) -> Result<u64, AquamanError> {
    let entries = read_entries_tolerant(current_path)?;
    if let Some(first) = entries.first() {
        if let Some(parsed) = aquaman_core::time_utils::parse_rfc3339_millis(&first.timestamp) {
            return Ok(parsed);
        }
    }
    Ok(current_unix_timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_log(rotate_bytes: u64, rotate_age_s: u64) -> (tempfile::TempDir, AuditLog) {
        let temp = tempfile::tempdir().unwrap();
        let log = AuditLog::open_with_policy(temp.path().join("audit"), rotate_bytes, rotate_age_s).unwrap();
        (temp, log)
    }

    #[test]
    fn first_entry_chains_from_zero_hash() {
        let (_temp, log) = open_log(DEFAULT_ROTATE_BYTES, DEFAULT_ROTATE_AGE_S);
        let entry = log.append(AuditEntryDraft::credential_access("anthropic", true));
        assert_eq!(entry.previous_hash, ZERO_HASH);
        assert_eq!(entry.hash.len(), 64);
    }

    #[test]
    fn consecutive_entries_chain_previous_hash_to_prior_hash() {
        let (_temp, log) = open_log(DEFAULT_ROTATE_BYTES, DEFAULT_ROTATE_AGE_S);
        let e1 = log.append(AuditEntryDraft::credential_access("anthropic", true));
        let e2 = log.append(AuditEntryDraft::credential_access("openai", true));
        assert_eq!(e2.previous_hash, e1.hash);
    }

    #[test]
    fn verify_reports_ok_on_untampered_chain() {
        let (_temp, log) = open_log(DEFAULT_ROTATE_BYTES, DEFAULT_ROTATE_AGE_S);
        for _ in 0..5 {
            log.append(AuditEntryDraft::credential_access("anthropic", true));
        }
        let report = log.verify().unwrap();
        assert!(report.ok);
        assert_eq!(report.entry_count, 5);
        assert_eq!(report.first_break_at, None);
    }

    #[test]
    fn verify_detects_a_single_flipped_byte() {
        let (temp, log) = open_log(DEFAULT_ROTATE_BYTES, DEFAULT_ROTATE_AGE_S);
        for _ in 0..5 {
            log.append(AuditEntryDraft::credential_access("anthropic", true));
        }
        let current_path = temp.path().join("audit").join("current.ndjson");
        let contents = fs::read_to_string(&current_path).unwrap();
        let mut lines: Vec<String> = contents.lines().map(str::to_string).collect();
        let third = &mut lines[2];
        let flipped = if third.contains('a') {
            third.replacen('a', "b", 1)
        } else {
            format!("{third}x")
        };
        lines[2] = flipped;
        fs::write(&current_path, lines.join("\n") + "\n").unwrap();

        let report = log.verify().unwrap();
        assert!(!report.ok);
        assert_eq!(report.first_break_at, Some(2));
    }

    #[test]
    fn tail_returns_last_n_entries_in_order() {
        let (_temp, log) = open_log(DEFAULT_ROTATE_BYTES, DEFAULT_ROTATE_AGE_S);
        for _ in 0..5 {
            log.append(AuditEntryDraft::credential_access("anthropic", true));
        }
        let tail = log.tail(2).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[1].previous_hash, tail[0].hash);
    }

    #[test]
    fn tail_tolerates_a_truncated_final_line() {
        let (temp, log) = open_log(DEFAULT_ROTATE_BYTES, DEFAULT_ROTATE_AGE_S);
        log.append(AuditEntryDraft::credential_access("anthropic", true));
        let current_path = temp.path().join("audit").join("current.ndjson");
        let mut file = OpenOptions::new().append(true).open(&current_path).unwrap();
        write!(file, "{{\"id\":\"truncated").unwrap();

        let tail = log.tail(5).unwrap();
        assert_eq!(tail.len(), 1);
    }

    #[test]
    fn rotation_below_thresholds_is_a_no_op() {
        let (_temp, log) = open_log(DEFAULT_ROTATE_BYTES, DEFAULT_ROTATE_AGE_S);
        log.append(AuditEntryDraft::credential_access("anthropic", true));
        let rotated = log.rotate_if_needed().unwrap();
        assert!(!rotated);
    }

    #[test]
    fn rotation_past_size_threshold_moves_current_segment_into_archive() {
        // append() performs rotation as the last step of its own critical
        // section (step 6 of the append algorithm), so a single append past
        // the size threshold already rotates; no separate call is needed.
        let (temp, log) = open_log(16, DEFAULT_ROTATE_AGE_S);
        log.append(AuditEntryDraft::credential_access("anthropic", true));

        let archive_dir = temp.path().join("audit").join("archive");
        let archived: Vec<_> = fs::read_dir(&archive_dir).unwrap().collect();
        assert_eq!(archived.len(), 1);

        let current_path = temp.path().join("audit").join("current.ndjson");
        assert!(!current_path.exists());
    }

    #[test]
    fn rotating_twice_yields_one_archive_file_per_rotation_event() {
        let (temp, log) = open_log(16, DEFAULT_ROTATE_AGE_S);
        log.append(AuditEntryDraft::credential_access("anthropic", true));
        log.append(AuditEntryDraft::credential_access("openai", true));

        let archive_dir = temp.path().join("audit").join("archive");
        let archived: Vec<_> = fs::read_dir(&archive_dir).unwrap().collect();
        assert_eq!(archived.len(), 2);
    }

    #[test]
    fn last_hash_survives_reopening_the_log() {
        let temp = tempfile::tempdir().unwrap();
        let log_dir = temp.path().join("audit");
        let entry = {
            let log = AuditLog::open(log_dir.clone()).unwrap();
            log.append(AuditEntryDraft::credential_access("anthropic", true))
        };
        let reopened = AuditLog::open(log_dir).unwrap();
        let next = reopened.append(AuditEntryDraft::credential_access("openai", true));
        assert_eq!(next.previous_hash, entry.hash);
    }

    proptest::proptest! {
        #[test]
        fn hash_chain_holds_over_arbitrary_append_sequences(services in proptest::collection::vec("[a-z]{3,8}", 1..20)) {
            let temp = tempfile::tempdir().unwrap();
            let log = AuditLog::open_with_policy(temp.path().join("audit"), DEFAULT_ROTATE_BYTES, DEFAULT_ROTATE_AGE_S).unwrap();
            let mut previous = ZERO_HASH.to_string();
            for service in services {
                let entry = log.append(AuditEntryDraft::credential_access(service, true));
                proptest::prop_assert_eq!(&entry.previous_hash, &previous);
                previous = entry.hash;
            }
            let report = log.verify().unwrap();
            proptest::prop_assert!(report.ok);
        }

        #[test]
        fn rotation_below_threshold_is_always_a_no_op(services in proptest::collection::vec("[a-z]{3,8}", 0..5)) {
            let temp = tempfile::tempdir().unwrap();
            let log = AuditLog::open_with_policy(temp.path().join("audit"), DEFAULT_ROTATE_BYTES, DEFAULT_ROTATE_AGE_S).unwrap();
            for service in services {
                log.append(AuditEntryDraft::credential_access(service, true));
            }
            proptest::prop_assert_eq!(log.rotate_if_needed().unwrap(), false);
            proptest::prop_assert_eq!(log.rotate_if_needed().unwrap(), false);
        }
    }
}

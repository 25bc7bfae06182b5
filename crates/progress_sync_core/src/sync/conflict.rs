//! crates/progress_sync_core/src/sync/conflict.rs
//!
//! Conflict policies for two diverging snapshots of the same record, and the
//! write reconciliation every Progress Store applies to stale writes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::domain::{
    AudioProgress, ChapterProgress, ConflictResolution, ContentProgress, HasId, PdfProgress,
    ProgressRecord, QuizProgress, ReadingProgress, SyncConflict, VideoProgress,
};

/// Fields compared when two snapshots diverge.
pub const TRACKED_FIELDS: &[&str] = &[
    "completionPercentage",
    "timeSpent",
    "lastPosition",
    "isCompleted",
    "content",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// The snapshot with the later `lastUpdated` wins wholesale.
    LatestWins,
    /// Keep the furthest progress on every field; lists are unioned.
    #[default]
    MostProgress,
    /// Like `MostProgress`, but time spent on both devices is summed.
    MergeData,
    /// Leave the conflict for the learner to settle field by field.
    UserChoice,
}

impl ConflictPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictPolicy::LatestWins => "latest_wins",
            ConflictPolicy::MostProgress => "most_progress",
            ConflictPolicy::MergeData => "merge_data",
            ConflictPolicy::UserChoice => "user_choice",
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "latest_wins" => Ok(ConflictPolicy::LatestWins),
            "most_progress" => Ok(ConflictPolicy::MostProgress),
            "merge_data" => Ok(ConflictPolicy::MergeData),
            "user_choice" => Ok(ConflictPolicy::UserChoice),
            other => Err(format!("unknown conflict policy '{}'", other)),
        }
    }
}

/// The outcome of running a policy over a local and a remote snapshot.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub record: ProgressRecord,
    pub conflicts: Vec<SyncConflict>,
    /// True when the policy deferred to the learner.
    pub needs_user: bool,
}

//=========================================================================================
// Policy Entry Points
//=========================================================================================

/// Resolves `local` (unpushed) against `remote` (the store's snapshot).
/// The returned record carries the remote's sync history and version.
pub fn resolve(
    policy: ConflictPolicy,
    local: &ProgressRecord,
    remote: &ProgressRecord,
    now: DateTime<Utc>,
) -> Resolution {
    match policy {
        ConflictPolicy::LatestWins => {
            let mut record = if local.last_updated > remote.last_updated {
                local.clone()
            } else {
                remote.clone()
            };
            record.sync_version = remote.sync_version;
            record.sync_conflicts = remote.sync_conflicts.clone();
            let conflicts = diff(local, remote, &record, now);
            Resolution {
                record,
                conflicts,
                needs_user: false,
            }
        }
        ConflictPolicy::MostProgress => {
            let record = most_progress(local, remote);
            let conflicts = diff(local, remote, &record, now);
            Resolution {
                record,
                conflicts,
                needs_user: false,
            }
        }
        ConflictPolicy::MergeData => {
            let mut record = most_progress(local, remote);
            record.time_spent = local.time_spent + remote.time_spent;
            record.sync_version = local.sync_version.max(remote.sync_version) + 1;
            let conflicts = diff(local, remote, &record, now);
            Resolution {
                record,
                conflicts,
                needs_user: false,
            }
        }
        ConflictPolicy::UserChoice => {
            let conflicts: Vec<SyncConflict> = TRACKED_FIELDS
                .iter()
                .filter_map(|field| {
                    let local_value = field_value(local, field);
                    let remote_value = field_value(remote, field);
                    (local_value != remote_value).then(|| SyncConflict {
                        field: field.to_string(),
                        local_value,
                        remote_value,
                        resolution: ConflictResolution::Unresolved,
                        timestamp: now,
                    })
                })
                .collect();
            let mut record = local.clone();
            record.sync_version = remote.sync_version;
            Resolution {
                needs_user: !conflicts.is_empty(),
                record,
                conflicts,
            }
        }
    }
}

/// A write as the store ended up persisting it.
#[derive(Debug, Clone)]
pub struct Reconciled {
    pub record: ProgressRecord,
    /// True when the write was stale and had to be re-merged.
    pub merged: bool,
}

/// Decides what a store persists for `incoming`. A write exactly one version
/// past the stored record is accepted as-is; anything else is re-merged with the
/// stored record and assigned the next version. `UserChoice` cannot run
/// unattended and falls back to `MostProgress`.
pub fn reconcile_write(
    existing: Option<&ProgressRecord>,
    mut incoming: ProgressRecord,
    policy: ConflictPolicy,
    now: DateTime<Utc>,
) -> Reconciled {
    let Some(stored) = existing else {
        incoming.sync_version = 1;
        return Reconciled {
            record: incoming,
            merged: false,
        };
    };

    let next_version = stored.sync_version + 1;
    if incoming.sync_version == next_version {
        return Reconciled {
            record: incoming,
            merged: false,
        };
    }

    let policy = match policy {
        ConflictPolicy::UserChoice => ConflictPolicy::MostProgress,
        other => other,
    };
    let resolution = resolve(policy, &incoming, stored, now);
    let mut record = resolution.record;
    record.sync_version = next_version;
    record.record_conflicts(&resolution.conflicts);
    record.record_conflicts(&[SyncConflict {
        field: "syncVersion".to_string(),
        local_value: Value::from(incoming.sync_version),
        remote_value: Value::from(stored.sync_version),
        resolution: ConflictResolution::Merged,
        timestamp: now,
    }]);
    Reconciled {
        record,
        merged: true,
    }
}

//=========================================================================================
// Field Access
//=========================================================================================

/// The JSON value of one tracked field.
pub fn field_value(record: &ProgressRecord, field: &str) -> Value {
    match field {
        "completionPercentage" => Value::from(record.completion_percentage),
        "timeSpent" => Value::from(record.time_spent),
        "lastPosition" => Value::from(record.last_position),
        "isCompleted" => Value::from(record.is_completed),
        "content" => serde_json::to_value(&record.content).unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

/// Copies one tracked field from `source` into `target`. Returns false for an
/// unknown field name.
pub fn copy_field(target: &mut ProgressRecord, source: &ProgressRecord, field: &str) -> bool {
    match field {
        "completionPercentage" => target.completion_percentage = source.completion_percentage,
        "timeSpent" => target.time_spent = source.time_spent,
        "lastPosition" => target.last_position = source.last_position,
        "isCompleted" => target.is_completed = source.is_completed,
        "content" => target.content = source.content.clone(),
        _ => return false,
    }
    true
}

/// Conflict entries for every field where `resolved` departs from the remote.
fn diff(
    local: &ProgressRecord,
    remote: &ProgressRecord,
    resolved: &ProgressRecord,
    now: DateTime<Utc>,
) -> Vec<SyncConflict> {
    TRACKED_FIELDS
        .iter()
        .filter_map(|field| {
            let remote_value = field_value(remote, field);
            let chosen = field_value(resolved, field);
            if chosen == remote_value {
                return None;
            }
            let local_value = field_value(local, field);
            let resolution = if chosen == local_value {
                ConflictResolution::Local
            } else {
                ConflictResolution::Merged
            };
            Some(SyncConflict {
                field: field.to_string(),
                local_value,
                remote_value,
                resolution,
                timestamp: now,
            })
        })
        .collect()
}

//=========================================================================================
// Most-Progress Merge
//=========================================================================================

fn most_progress(local: &ProgressRecord, remote: &ProgressRecord) -> ProgressRecord {
    let local_newer = local.last_updated > remote.last_updated;
    let mut record = local.clone();

    record.completion_percentage = local.completion_percentage.max(remote.completion_percentage);
    record.time_spent = local.time_spent.max(remote.time_spent);
    record.last_position = if local.completion_percentage > remote.completion_percentage {
        local.last_position
    } else if remote.completion_percentage > local.completion_percentage {
        remote.last_position
    } else {
        local.last_position.max(remote.last_position)
    };
    record.is_completed = local.is_completed || remote.is_completed;
    record.content = merge_content(local.content.as_ref(), remote.content.as_ref(), local_newer);

    record.last_updated = local.last_updated.max(remote.last_updated);
    record.sync_version = remote.sync_version;
    record.sync_conflicts = remote.sync_conflicts.clone();
    record
}

/// Merges two content blocks keeping the furthest progress. Blocks of different
/// variants cannot be combined; the remote block is kept.
pub fn merge_content(
    local: Option<&ContentProgress>,
    remote: Option<&ContentProgress>,
    local_newer: bool,
) -> Option<ContentProgress> {
    let merged = match (local, remote) {
        (None, None) => return None,
        (Some(only), None) | (None, Some(only)) => only.clone(),
        (Some(ContentProgress::Video(l)), Some(ContentProgress::Video(r))) => {
            ContentProgress::Video(merge_video(l, r, local_newer))
        }
        (Some(ContentProgress::Text(l)), Some(ContentProgress::Text(r))) => {
            ContentProgress::Text(merge_reading(l, r))
        }
        (Some(ContentProgress::Quiz(l)), Some(ContentProgress::Quiz(r))) => {
            ContentProgress::Quiz(pick_quiz(l, r))
        }
        (Some(ContentProgress::Audio(l)), Some(ContentProgress::Audio(r))) => {
            ContentProgress::Audio(merge_audio(l, r, local_newer))
        }
        (Some(ContentProgress::Pdf(l)), Some(ContentProgress::Pdf(r))) => {
            ContentProgress::Pdf(merge_pdf(l, r, local_newer))
        }
        (Some(_), Some(remote)) => remote.clone(),
    };
    Some(merged)
}

/// Unions two lists by stable id: remote entries first, then local entries the
/// remote does not have.
pub fn merge_by_id<T: HasId + Clone>(remote: &[T], local: &[T]) -> Vec<T> {
    let mut seen: HashSet<&str> = HashSet::with_capacity(remote.len() + local.len());
    let mut merged = Vec::with_capacity(remote.len() + local.len());
    for item in remote.iter().chain(local.iter()) {
        if seen.insert(item.id()) {
            merged.push(item.clone());
        }
    }
    merged
}

fn union_values<T: PartialEq + Clone>(remote: &[T], local: &[T]) -> Vec<T> {
    let mut merged = remote.to_vec();
    for item in local {
        if !merged.contains(item) {
            merged.push(item.clone());
        }
    }
    merged
}

fn merge_chapters(remote: &[ChapterProgress], local: &[ChapterProgress]) -> Vec<ChapterProgress> {
    merge_by_id(remote, local)
        .into_iter()
        .map(|mut chapter| {
            let id = chapter.id.clone();
            for c in remote.iter().chain(local.iter()).filter(|c| c.id == id) {
                chapter.completed |= c.completed;
                chapter.time_spent = chapter.time_spent.max(c.time_spent);
            }
            chapter
        })
        .collect()
}

fn merge_video(local: &VideoProgress, remote: &VideoProgress, local_newer: bool) -> VideoProgress {
    let mut merged = if local_newer { local.clone() } else { remote.clone() };
    merged.current_time = local.current_time.max(remote.current_time);
    merged.duration = local.duration.max(remote.duration);
    merged.chapters = merge_chapters(&remote.chapters, &local.chapters);
    merged.bookmarks = merge_by_id(&remote.bookmarks, &local.bookmarks);
    merged.notes = merge_by_id(&remote.notes, &local.notes);
    merged
}

fn merge_audio(local: &AudioProgress, remote: &AudioProgress, local_newer: bool) -> AudioProgress {
    let mut merged = if local_newer { local.clone() } else { remote.clone() };
    merged.current_time = local.current_time.max(remote.current_time);
    merged.duration = local.duration.max(remote.duration);
    merged.bookmarks = merge_by_id(&remote.bookmarks, &local.bookmarks);
    merged
}

fn merge_reading(local: &ReadingProgress, remote: &ReadingProgress) -> ReadingProgress {
    ReadingProgress {
        scroll_percentage: local.scroll_percentage.max(remote.scroll_percentage),
        reading_time: local.reading_time.max(remote.reading_time),
        words_read: local.words_read.max(remote.words_read),
        sections_completed: union_values(&remote.sections_completed, &local.sections_completed),
        highlights: merge_by_id(&remote.highlights, &local.highlights),
        notes: merge_by_id(&remote.notes, &local.notes),
    }
}

fn pick_quiz(local: &QuizProgress, remote: &QuizProgress) -> QuizProgress {
    let local_score = local.score.unwrap_or(f64::NEG_INFINITY);
    let remote_score = remote.score.unwrap_or(f64::NEG_INFINITY);
    let local_wins = local_score > remote_score
        || (local_score == remote_score
            && local.current_question_index > remote.current_question_index);
    if local_wins {
        local.clone()
    } else {
        remote.clone()
    }
}

fn merge_pdf(local: &PdfProgress, remote: &PdfProgress, local_newer: bool) -> PdfProgress {
    let local_further = local.current_page > remote.current_page
        || (local.current_page == remote.current_page && local_newer);
    let mut merged = if local_further { local.clone() } else { remote.clone() };
    merged.total_pages = local.total_pages.max(remote.total_pages);
    let mut pages = union_values(&remote.pages_completed, &local.pages_completed);
    pages.sort_unstable();
    merged.pages_completed = pages;
    merged.annotations = merge_by_id(&remote.annotations, &local.annotations);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Bookmark, ContentType, DeviceInfo, DeviceType, LessonKey};
    use chrono::Duration;

    fn device(id: &str) -> DeviceInfo {
        DeviceInfo {
            id: id.into(),
            name: format!("desktop - {}", id),
            device_type: DeviceType::Desktop,
            browser: "Chrome".into(),
            os: "Linux".into(),
            last_seen: Utc::now(),
            is_active: true,
        }
    }

    fn record(content_type: ContentType, device_id: &str, at: DateTime<Utc>) -> ProgressRecord {
        let key = LessonKey {
            user_id: "u1".into(),
            lesson_id: "l1".into(),
            course_id: "c1".into(),
            content_type,
        };
        ProgressRecord::new(&key, &device(device_id), at)
    }

    fn bookmark(id: &str) -> Bookmark {
        Bookmark {
            id: id.into(),
            title: id.into(),
            ..Default::default()
        }
    }

    #[test]
    fn most_progress_keeps_furthest_video_position_and_unions_bookmarks() {
        let now = Utc::now();
        let mut a = record(ContentType::Video, "a", now);
        a.content = Some(ContentProgress::Video(VideoProgress {
            current_time: 300.0,
            bookmarks: vec![bookmark("b1")],
            ..Default::default()
        }));
        let mut b = record(ContentType::Video, "b", now - Duration::seconds(5));
        b.content = Some(ContentProgress::Video(VideoProgress {
            current_time: 120.0,
            bookmarks: vec![bookmark("b2"), bookmark("b1")],
            ..Default::default()
        }));
        b.sync_version = 4;

        let resolution = resolve(ConflictPolicy::MostProgress, &a, &b, now);
        let video = resolution.record.video().unwrap();
        assert_eq!(video.current_time, 300.0);
        let ids: Vec<&str> = video.bookmarks.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["b2", "b1"]);
        assert_eq!(resolution.record.sync_version, 4);
        assert!(!resolution.needs_user);
        let content = resolution
            .conflicts
            .iter()
            .find(|c| c.field == "content")
            .unwrap();
        assert_eq!(content.resolution, ConflictResolution::Merged);
    }

    #[test]
    fn most_progress_takes_max_completion_and_matching_position() {
        let now = Utc::now();
        let mut local = record(ContentType::Text, "a", now);
        local.completion_percentage = 40.0;
        local.last_position = 40.0;
        local.time_spent = 500.0;
        let mut remote = record(ContentType::Text, "b", now);
        remote.completion_percentage = 70.0;
        remote.last_position = 70.0;
        remote.time_spent = 200.0;
        remote.is_completed = false;
        local.is_completed = true;

        let merged = resolve(ConflictPolicy::MostProgress, &local, &remote, now).record;
        assert_eq!(merged.completion_percentage, 70.0);
        assert_eq!(merged.last_position, 70.0);
        assert_eq!(merged.time_spent, 500.0);
        assert!(merged.is_completed);
    }

    #[test]
    fn reading_sections_are_unioned_without_duplicates() {
        let now = Utc::now();
        let mut local = record(ContentType::Text, "a", now);
        local.content = Some(ContentProgress::Text(ReadingProgress {
            scroll_percentage: 30.0,
            sections_completed: vec!["intro".into(), "part-1".into()],
            ..Default::default()
        }));
        let mut remote = record(ContentType::Text, "b", now);
        remote.content = Some(ContentProgress::Text(ReadingProgress {
            scroll_percentage: 55.0,
            sections_completed: vec!["intro".into(), "part-2".into()],
            ..Default::default()
        }));
        let merged = resolve(ConflictPolicy::MostProgress, &local, &remote, now).record;
        let reading = merged.reading().unwrap();
        assert_eq!(reading.scroll_percentage, 55.0);
        assert_eq!(reading.sections_completed, vec!["intro", "part-2", "part-1"]);
    }

    #[test]
    fn quiz_block_follows_higher_score() {
        let now = Utc::now();
        let mut local = record(ContentType::Quiz, "a", now);
        local.content = Some(ContentProgress::Quiz(QuizProgress {
            current_question_index: 9,
            score: Some(60.0),
            ..Default::default()
        }));
        let mut remote = record(ContentType::Quiz, "b", now);
        remote.content = Some(ContentProgress::Quiz(QuizProgress {
            current_question_index: 4,
            score: Some(80.0),
            ..Default::default()
        }));
        let merged = resolve(ConflictPolicy::MostProgress, &local, &remote, now).record;
        assert_eq!(merged.quiz().unwrap().current_question_index, 4);
    }

    #[test]
    fn latest_wins_picks_newer_snapshot_wholesale() {
        let now = Utc::now();
        let mut local = record(ContentType::Audio, "a", now);
        local.completion_percentage = 10.0;
        let mut remote = record(ContentType::Audio, "b", now - Duration::minutes(1));
        remote.completion_percentage = 90.0;
        remote.sync_version = 2;

        let resolution = resolve(ConflictPolicy::LatestWins, &local, &remote, now);
        assert_eq!(resolution.record.completion_percentage, 10.0);
        assert_eq!(resolution.record.sync_version, 2);
        assert_eq!(resolution.conflicts.len(), 1);
        assert_eq!(resolution.conflicts[0].resolution, ConflictResolution::Local);
    }

    #[test]
    fn merge_data_sums_time_and_bumps_version() {
        let now = Utc::now();
        let mut local = record(ContentType::Pdf, "a", now);
        local.time_spent = 120.0;
        local.sync_version = 3;
        let mut remote = record(ContentType::Pdf, "b", now);
        remote.time_spent = 80.0;
        remote.sync_version = 5;

        let merged = resolve(ConflictPolicy::MergeData, &local, &remote, now).record;
        assert_eq!(merged.time_spent, 200.0);
        assert_eq!(merged.sync_version, 6);
    }

    #[test]
    fn user_choice_marks_differing_fields_unresolved() {
        let now = Utc::now();
        let mut local = record(ContentType::Video, "a", now);
        local.completion_percentage = 20.0;
        let mut remote = record(ContentType::Video, "b", now);
        remote.completion_percentage = 50.0;
        remote.time_spent = 30.0;

        let resolution = resolve(ConflictPolicy::UserChoice, &local, &remote, now);
        assert!(resolution.needs_user);
        let fields: Vec<&str> = resolution.conflicts.iter().map(|c| c.field.as_str()).collect();
        assert_eq!(fields, vec!["completionPercentage", "timeSpent"]);
        assert!(resolution
            .conflicts
            .iter()
            .all(|c| c.resolution == ConflictResolution::Unresolved));
        assert_eq!(resolution.record.completion_percentage, 20.0);
    }

    #[test]
    fn reconcile_accepts_next_version_and_remerges_stale_writes() {
        let now = Utc::now();
        let first = reconcile_write(
            None,
            record(ContentType::Text, "a", now),
            ConflictPolicy::MostProgress,
            now,
        );
        assert_eq!(first.record.sync_version, 1);
        assert!(!first.merged);

        let mut next = first.record.clone();
        next.sync_version = 2;
        next.completion_percentage = 30.0;
        let accepted = reconcile_write(Some(&first.record), next, ConflictPolicy::MostProgress, now);
        assert!(!accepted.merged);
        assert_eq!(accepted.record.completion_percentage, 30.0);

        let mut stale = record(ContentType::Text, "b", now);
        stale.sync_version = 1;
        stale.completion_percentage = 10.0;
        stale.time_spent = 900.0;
        let merged = reconcile_write(Some(&accepted.record), stale, ConflictPolicy::UserChoice, now);
        assert!(merged.merged);
        assert_eq!(merged.record.sync_version, 3);
        assert_eq!(merged.record.completion_percentage, 30.0);
        assert_eq!(merged.record.time_spent, 900.0);
        let last = merged.record.sync_conflicts.last().unwrap();
        assert_eq!(last.field, "syncVersion");
        assert_eq!(last.resolution, ConflictResolution::Merged);
    }
}

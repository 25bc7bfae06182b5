//! crates/progress_sync_core/src/domain.rs
//!
//! Defines the pure, core data structures for learning-progress sync.
//! These structs carry no storage or transport logic; their serde shape is the
//! camelCase record layout shared by every device and every store adapter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

//=========================================================================================
// Identity Types
//=========================================================================================

/// The kind of content a lesson presents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Video,
    Text,
    Quiz,
    Audio,
    Pdf,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Video => "video",
            ContentType::Text => "text",
            ContentType::Quiz => "quiz",
            ContentType::Audio => "audio",
            ContentType::Pdf => "pdf",
        }
    }

    /// Video and audio report positions in seconds of playback.
    pub fn is_time_based(&self) -> bool {
        matches!(self, ContentType::Video | ContentType::Audio)
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "video" => Ok(ContentType::Video),
            "text" => Ok(ContentType::Text),
            "quiz" => Ok(ContentType::Quiz),
            "audio" => Ok(ContentType::Audio),
            "pdf" => Ok(ContentType::Pdf),
            other => Err(format!("unknown content type '{}'", other)),
        }
    }
}

/// Addresses one learner's progress on one lesson.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonKey {
    pub user_id: String,
    pub lesson_id: String,
    pub course_id: String,
    pub content_type: ContentType,
}

//=========================================================================================
// Device Types
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Desktop,
    Mobile,
    Tablet,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Desktop => "desktop",
            DeviceType::Mobile => "mobile",
            DeviceType::Tablet => "tablet",
        }
    }
}

/// Descriptive metadata for the device that authored a write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    pub browser: String,
    pub os: String,
    pub last_seen: DateTime<Utc>,
    pub is_active: bool,
}

//=========================================================================================
// Content-Specific Progress Blocks
//=========================================================================================

/// Items in mergeable lists carry a stable id that survives cross-device merges.
pub trait HasId {
    fn id(&self) -> &str;
}

macro_rules! impl_has_id {
    ($($ty:ty),* $(,)?) => {
        $(impl HasId for $ty {
            fn id(&self) -> &str {
                &self.id
            }
        })*
    };
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChapterProgress {
    pub id: String,
    pub completed: bool,
    pub time_spent: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Bookmark {
    pub id: String,
    pub timestamp: f64,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VideoNote {
    pub id: String,
    pub timestamp: f64,
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Highlight {
    pub id: String,
    pub text: String,
    pub position: f64,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReadingNote {
    pub id: String,
    pub content: String,
    pub position: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationKind {
    #[default]
    Highlight,
    Note,
    Bookmark,
    Drawing,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PdfAnnotation {
    pub id: String,
    pub page: u32,
    pub x: f64,
    pub y: f64,
    pub kind: AnnotationKind,
    pub content: String,
}

impl_has_id!(ChapterProgress, Bookmark, VideoNote, Highlight, ReadingNote, PdfAnnotation);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VideoProgress {
    pub current_time: f64,
    pub duration: f64,
    pub playback_rate: f64,
    pub volume: f64,
    pub quality_level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle_track: Option<String>,
    pub chapters: Vec<ChapterProgress>,
    pub bookmarks: Vec<Bookmark>,
    pub notes: Vec<VideoNote>,
}

impl Default for VideoProgress {
    fn default() -> Self {
        Self {
            current_time: 0.0,
            duration: 0.0,
            playback_rate: 1.0,
            volume: 1.0,
            quality_level: "auto".to_string(),
            subtitle_track: None,
            chapters: Vec::new(),
            bookmarks: Vec::new(),
            notes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReadingProgress {
    pub scroll_percentage: f64,
    pub reading_time: f64,
    pub words_read: f64,
    pub sections_completed: Vec<String>,
    pub highlights: Vec<Highlight>,
    pub notes: Vec<ReadingNote>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QuizMistake {
    pub question_id: String,
    pub incorrect_answer: Value,
    pub correct_answer: Value,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QuizProgress {
    pub current_question_index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_questions: Option<u32>,
    pub answers: BTreeMap<String, Value>,
    pub attempts: u32,
    pub time_spent: f64,
    pub hints_used: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    pub completed: bool,
    pub mistakes: Vec<QuizMistake>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AudioProgress {
    pub current_time: f64,
    pub duration: f64,
    pub playback_rate: f64,
    pub volume: f64,
    pub bookmarks: Vec<Bookmark>,
}

impl Default for AudioProgress {
    fn default() -> Self {
        Self {
            current_time: 0.0,
            duration: 0.0,
            playback_rate: 1.0,
            volume: 1.0,
            bookmarks: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PdfProgress {
    pub current_page: u32,
    pub total_pages: u32,
    pub scroll_position: f64,
    pub zoom_level: f64,
    pub pages_completed: Vec<u32>,
    pub annotations: Vec<PdfAnnotation>,
}

impl Default for PdfProgress {
    fn default() -> Self {
        Self {
            current_page: 0,
            total_pages: 0,
            scroll_position: 0.0,
            zoom_level: 1.0,
            pages_completed: Vec::new(),
            annotations: Vec::new(),
        }
    }
}

/// The content-type-specific block of a record. Exactly one variant exists per
/// record and it always matches the record's `content_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentProgress {
    Video(VideoProgress),
    Text(ReadingProgress),
    Quiz(QuizProgress),
    Audio(AudioProgress),
    Pdf(PdfProgress),
}

impl ContentProgress {
    pub fn content_type(&self) -> ContentType {
        match self {
            ContentProgress::Video(_) => ContentType::Video,
            ContentProgress::Text(_) => ContentType::Text,
            ContentProgress::Quiz(_) => ContentType::Quiz,
            ContentProgress::Audio(_) => ContentType::Audio,
            ContentProgress::Pdf(_) => ContentType::Pdf,
        }
    }
}

//=========================================================================================
// Sync Metadata
//=========================================================================================

/// How a single diverging field was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    Local,
    Remote,
    Merged,
    /// Waiting on an explicit choice from the learner.
    Unresolved,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConflict {
    pub field: String,
    pub local_value: Value,
    pub remote_value: Value,
    pub resolution: ConflictResolution,
    pub timestamp: DateTime<Utc>,
}

//=========================================================================================
// ProgressRecord
//=========================================================================================

/// Records keep only the most recent conflict entries.
pub const MAX_RECORDED_CONFLICTS: usize = 50;

/// One learner's progress on one lesson, as exchanged with the Progress Store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    pub user_id: String,
    pub lesson_id: String,
    pub course_id: String,
    pub content_type: ContentType,

    pub completion_percentage: f64,
    pub time_spent: f64,
    /// Seconds for video/audio, scroll percent for text, question number for quiz,
    /// page (with the fractional part as in-page scroll) for pdf.
    pub last_position: f64,
    pub is_completed: bool,

    #[serde(default)]
    pub content: Option<ContentProgress>,

    pub device_id: String,
    pub device_info: DeviceInfo,
    pub last_updated: DateTime<Utc>,
    pub sync_version: u64,
    #[serde(default)]
    pub sync_conflicts: Vec<SyncConflict>,
}

/// A content block that does not belong to the record's content type.
#[derive(Debug, thiserror::Error)]
#[error("content block of type {found} does not match lesson content type {expected}")]
pub struct ContentMismatch {
    pub expected: ContentType,
    pub found: ContentType,
}

impl ProgressRecord {
    /// Creates an empty record for a lesson, authored by `device`.
    pub fn new(key: &LessonKey, device: &DeviceInfo, now: DateTime<Utc>) -> Self {
        Self {
            user_id: key.user_id.clone(),
            lesson_id: key.lesson_id.clone(),
            course_id: key.course_id.clone(),
            content_type: key.content_type,
            completion_percentage: 0.0,
            time_spent: 0.0,
            last_position: 0.0,
            is_completed: false,
            content: None,
            device_id: device.id.clone(),
            device_info: device.clone(),
            last_updated: now,
            sync_version: 0,
            sync_conflicts: Vec::new(),
        }
    }

    pub fn key(&self) -> LessonKey {
        LessonKey {
            user_id: self.user_id.clone(),
            lesson_id: self.lesson_id.clone(),
            course_id: self.course_id.clone(),
            content_type: self.content_type,
        }
    }

    pub fn video(&self) -> Option<&VideoProgress> {
        match &self.content {
            Some(ContentProgress::Video(v)) => Some(v),
            _ => None,
        }
    }

    pub fn reading(&self) -> Option<&ReadingProgress> {
        match &self.content {
            Some(ContentProgress::Text(r)) => Some(r),
            _ => None,
        }
    }

    pub fn quiz(&self) -> Option<&QuizProgress> {
        match &self.content {
            Some(ContentProgress::Quiz(q)) => Some(q),
            _ => None,
        }
    }

    pub fn audio(&self) -> Option<&AudioProgress> {
        match &self.content {
            Some(ContentProgress::Audio(a)) => Some(a),
            _ => None,
        }
    }

    pub fn pdf(&self) -> Option<&PdfProgress> {
        match &self.content {
            Some(ContentProgress::Pdf(p)) => Some(p),
            _ => None,
        }
    }

    /// Applies a partial update. Universal fields are always applied (clamped to
    /// their valid ranges); a content block of the wrong type is rejected.
    pub fn apply_patch(&mut self, patch: ProgressPatch) -> Result<(), ContentMismatch> {
        if let Some(pct) = patch.completion_percentage {
            self.completion_percentage = pct.clamp(0.0, 100.0);
        }
        if let Some(time) = patch.time_spent {
            self.time_spent = time.max(0.0);
        }
        if let Some(position) = patch.last_position {
            self.last_position = position.max(0.0);
        }
        if let Some(done) = patch.is_completed {
            self.is_completed = done;
        }
        if let Some(content) = patch.content {
            let found = content.content_type();
            if found != self.content_type {
                return Err(ContentMismatch {
                    expected: self.content_type,
                    found,
                });
            }
            self.content = Some(content);
        }
        Ok(())
    }

    /// Appends conflict entries, dropping the oldest beyond the retention cap.
    pub fn record_conflicts(&mut self, conflicts: &[SyncConflict]) {
        self.sync_conflicts.extend_from_slice(conflicts);
        if self.sync_conflicts.len() > MAX_RECORDED_CONFLICTS {
            let excess = self.sync_conflicts.len() - MAX_RECORDED_CONFLICTS;
            self.sync_conflicts.drain(..excess);
        }
    }

    /// Compares learner-visible progress, ignoring provenance and sync metadata.
    pub fn same_progress(&self, other: &ProgressRecord) -> bool {
        self.completion_percentage == other.completion_percentage
            && self.time_spent == other.time_spent
            && self.last_position == other.last_position
            && self.is_completed == other.is_completed
            && self.content == other.content
    }
}

/// A partial update to a record, as issued by the rendering layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProgressPatch {
    pub completion_percentage: Option<f64>,
    pub time_spent: Option<f64>,
    pub last_position: Option<f64>,
    pub is_completed: Option<bool>,
    pub content: Option<ContentProgress>,
}

impl ProgressPatch {
    /// The patch issued when a learner restarts a lesson from the beginning.
    pub fn restart() -> Self {
        Self {
            completion_percentage: Some(0.0),
            time_spent: Some(0.0),
            last_position: Some(0.0),
            is_completed: Some(false),
            content: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> DeviceInfo {
        DeviceInfo {
            id: "device_a".into(),
            name: "desktop - Chrome".into(),
            device_type: DeviceType::Desktop,
            browser: "Chrome".into(),
            os: "Linux".into(),
            last_seen: Utc::now(),
            is_active: true,
        }
    }

    fn key(content_type: ContentType) -> LessonKey {
        LessonKey {
            user_id: "u1".into(),
            lesson_id: "l1".into(),
            course_id: "c1".into(),
            content_type,
        }
    }

    #[test]
    fn patch_clamps_universal_fields() {
        let mut record = ProgressRecord::new(&key(ContentType::Video), &device(), Utc::now());
        record
            .apply_patch(ProgressPatch {
                completion_percentage: Some(140.0),
                time_spent: Some(-3.0),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(record.completion_percentage, 100.0);
        assert_eq!(record.time_spent, 0.0);
    }

    #[test]
    fn mismatched_block_is_rejected_but_universal_fields_apply() {
        let mut record = ProgressRecord::new(&key(ContentType::Video), &device(), Utc::now());
        let err = record
            .apply_patch(ProgressPatch {
                completion_percentage: Some(40.0),
                content: Some(ContentProgress::Quiz(QuizProgress::default())),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.expected, ContentType::Video);
        assert_eq!(err.found, ContentType::Quiz);
        assert_eq!(record.completion_percentage, 40.0);
        assert!(record.content.is_none());
    }

    #[test]
    fn content_block_serializes_with_kind_tag() {
        let block = ContentProgress::Text(ReadingProgress {
            scroll_percentage: 62.0,
            ..Default::default()
        });
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["kind"], "text");
        assert_eq!(json["scrollPercentage"], 62.0);
    }

    #[test]
    fn conflict_history_is_capped() {
        let mut record = ProgressRecord::new(&key(ContentType::Text), &device(), Utc::now());
        let entry = SyncConflict {
            field: "timeSpent".into(),
            local_value: Value::from(1),
            remote_value: Value::from(2),
            resolution: ConflictResolution::Merged,
            timestamp: Utc::now(),
        };
        for _ in 0..(MAX_RECORDED_CONFLICTS + 5) {
            record.record_conflicts(std::slice::from_ref(&entry));
        }
        assert_eq!(record.sync_conflicts.len(), MAX_RECORDED_CONFLICTS);
    }
}

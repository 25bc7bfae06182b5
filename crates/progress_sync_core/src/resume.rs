//! crates/progress_sync_core/src/resume.rs
//!
//! Resume points: where the learner stopped, whether it is worth offering to
//! continue from there, and the human-readable context for the prompt. The
//! tracker keeps a bounded history of accepted resume points in `LocalStore`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::ResumePreferences;
use crate::domain::{ChapterProgress, ContentType, DeviceType, ProgressRecord};
use crate::ports::LocalStore;

/// Resume points are not offered once a lesson is this far along.
pub const RESUME_COMPLETION_CEILING: f64 = 95.0;

const DEFAULT_WORDS_PER_MINUTE: f64 = 200.0;
const SECONDS_PER_QUIZ_QUESTION: f64 = 120.0;
const SECONDS_PER_PDF_PAGE: f64 = 180.0;

pub fn history_key(lesson_id: &str) -> String {
    format!("resume_history_{}", lesson_id)
}

//=========================================================================================
// Resume Points
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeDevice {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: DeviceType,
}

/// Content-specific description of where the learner stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ResumePosition {
    Video {
        current_time: f64,
        duration: f64,
        playback_rate: f64,
        volume: f64,
        quality_level: String,
        subtitle_track: Option<String>,
        chapters: Vec<ChapterProgress>,
    },
    Text {
        scroll_percentage: f64,
        /// Rough paragraph index, one per ten percent scrolled.
        paragraph: u32,
        estimated_words_read: f64,
        reading_speed: f64,
    },
    Quiz {
        current_question_index: u32,
        total_questions: u32,
        answers: BTreeMap<String, Value>,
        attempts: u32,
        score: Option<f64>,
        hints_used: Vec<String>,
    },
    Audio {
        current_time: f64,
        duration: f64,
        playback_rate: f64,
        volume: f64,
    },
    Pdf {
        current_page: u32,
        total_pages: u32,
        scroll_position: f64,
        zoom_level: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumePoint {
    pub content_type: ContentType,
    pub lesson_id: String,
    pub course_id: String,
    /// When the underlying record was last written.
    pub timestamp: DateTime<Utc>,
    pub device: ResumeDevice,
    pub completion_percentage: f64,
    pub time_spent: f64,
    /// Seconds the current session has been open.
    pub session_duration: f64,
    pub position: ResumePosition,
}

fn position_for(record: &ProgressRecord) -> Option<ResumePosition> {
    match record.content_type {
        ContentType::Video => record.video().map(|v| ResumePosition::Video {
            current_time: v.current_time,
            duration: v.duration,
            playback_rate: v.playback_rate,
            volume: v.volume,
            quality_level: v.quality_level.clone(),
            subtitle_track: v.subtitle_track.clone(),
            chapters: v.chapters.clone(),
        }),
        ContentType::Text => record.reading().map(|r| {
            let minutes = record.time_spent / 60.0;
            let speed = if r.words_read > 0.0 && minutes > 0.0 {
                r.words_read / minutes
            } else {
                DEFAULT_WORDS_PER_MINUTE
            };
            ResumePosition::Text {
                scroll_percentage: r.scroll_percentage,
                paragraph: (r.scroll_percentage / 10.0).floor().max(0.0) as u32,
                estimated_words_read: r.words_read,
                reading_speed: speed,
            }
        }),
        ContentType::Quiz => record.quiz().map(|q| ResumePosition::Quiz {
            current_question_index: q.current_question_index,
            total_questions: q
                .total_questions
                .unwrap_or(q.answers.len() as u32 + q.current_question_index),
            answers: q.answers.clone(),
            attempts: q.attempts,
            score: q.score,
            hints_used: q.hints_used.clone(),
        }),
        ContentType::Audio => Some(match record.audio() {
            Some(a) => ResumePosition::Audio {
                current_time: a.current_time,
                duration: a.duration,
                playback_rate: a.playback_rate,
                volume: a.volume,
            },
            None => ResumePosition::Audio {
                current_time: record.last_position,
                duration: 0.0,
                playback_rate: 1.0,
                volume: 1.0,
            },
        }),
        ContentType::Pdf => Some(match record.pdf() {
            Some(p) => ResumePosition::Pdf {
                current_page: p.current_page,
                total_pages: p.total_pages,
                scroll_position: p.scroll_position,
                zoom_level: p.zoom_level,
            },
            // Integer part is the page, fractional part the scroll within it.
            None => ResumePosition::Pdf {
                current_page: record.last_position.floor().max(0.0) as u32,
                total_pages: 0,
                scroll_position: record.last_position.fract(),
                zoom_level: 1.0,
            },
        }),
    }
}

/// Whether a point is far enough along, but not too far, to offer resuming.
pub fn should_offer(point: &ResumePoint, prefs: &ResumePreferences) -> bool {
    if point.completion_percentage >= RESUME_COMPLETION_CEILING {
        return false;
    }
    match &point.position {
        ResumePosition::Video { current_time, .. } | ResumePosition::Audio { current_time, .. } => {
            *current_time >= prefs.resume_threshold
        }
        ResumePosition::Text {
            scroll_percentage, ..
        } => *scroll_percentage >= prefs.resume_threshold,
        ResumePosition::Quiz {
            current_question_index,
            ..
        } => *current_question_index > 0,
        ResumePosition::Pdf { .. } => point.completion_percentage >= prefs.resume_threshold,
    }
}

/// The resume point for a record, if one should be offered.
pub fn compute_resume_point(
    record: &ProgressRecord,
    prefs: &ResumePreferences,
    session_started: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<ResumePoint> {
    if record.completion_percentage <= 0.0 {
        return None;
    }
    let point = ResumePoint {
        content_type: record.content_type,
        lesson_id: record.lesson_id.clone(),
        course_id: record.course_id.clone(),
        timestamp: record.last_updated,
        device: ResumeDevice {
            id: record.device_info.id.clone(),
            name: record.device_info.name.clone(),
            device_type: record.device_info.device_type,
        },
        completion_percentage: record.completion_percentage,
        time_spent: record.time_spent,
        session_duration: ((now - session_started).num_milliseconds() as f64 / 1000.0).max(0.0),
        position: position_for(record)?,
    };
    should_offer(&point, prefs).then_some(point)
}

//=========================================================================================
// Context and Formatting
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeAction {
    Continue,
    Restart,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeSuggestion {
    pub action: ResumeAction,
    pub label: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeContext {
    pub content_type: ContentType,
    pub title: String,
    /// Seconds.
    pub estimated_time_remaining: f64,
    pub last_access_time: DateTime<Utc>,
    pub progress_summary: String,
    pub suggestions: Vec<ResumeSuggestion>,
}

/// `754.0` → `"12:34"`.
pub fn format_clock(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as u64;
    format!("{}:{:02}", total / 60, total % 60)
}

pub fn format_time_remaining(seconds: f64) -> String {
    let seconds = seconds.max(0.0);
    if seconds < 60.0 {
        format!("{} seconds", seconds.round())
    } else if seconds < 3600.0 {
        format!("{} minutes", (seconds / 60.0).round())
    } else {
        format!("{} hours", (seconds / 3600.0).round())
    }
}

fn suggestions(continue_label: &str, continue_description: String, restart: &str) -> Vec<ResumeSuggestion> {
    vec![
        ResumeSuggestion {
            action: ResumeAction::Continue,
            label: continue_label.to_string(),
            description: continue_description,
        },
        ResumeSuggestion {
            action: ResumeAction::Restart,
            label: "Start over".to_string(),
            description: restart.to_string(),
        },
    ]
}

pub fn resume_context(point: &ResumePoint, title: &str) -> ResumeContext {
    let (estimated, summary, suggestions) = match &point.position {
        ResumePosition::Video {
            current_time,
            duration,
            playback_rate,
            ..
        } => (
            (duration - current_time).max(0.0) / playback_rate.max(0.1),
            format!("{} / {}", format_clock(*current_time), format_clock(*duration)),
            suggestions(
                "Continue watching",
                format!("Continue from {}", format_clock(*current_time)),
                "Restart the video from the beginning",
            ),
        ),
        ResumePosition::Audio {
            current_time,
            duration,
            playback_rate,
            ..
        } => (
            (duration - current_time).max(0.0) / playback_rate.max(0.1),
            format!("{} / {}", format_clock(*current_time), format_clock(*duration)),
            suggestions(
                "Continue listening",
                format!("Continue from {}", format_clock(*current_time)),
                "Restart the audio from the beginning",
            ),
        ),
        ResumePosition::Text {
            scroll_percentage,
            estimated_words_read,
            reading_speed,
            ..
        } => {
            let unread = (100.0 - scroll_percentage).max(0.0);
            let remaining = if *scroll_percentage <= 0.0 {
                0.0
            } else if *estimated_words_read > 0.0 {
                let total_words = estimated_words_read * 100.0 / scroll_percentage;
                (total_words - estimated_words_read).max(0.0) / reading_speed * 60.0
            } else {
                // No word count: extrapolate the time it took to get this far.
                point.time_spent * unread / scroll_percentage
            };
            (
                remaining,
                format!("{}% read", scroll_percentage.round()),
                suggestions(
                    "Continue reading",
                    format!("Continue at {}%", scroll_percentage.round()),
                    "Read the text again from the beginning",
                ),
            )
        }
        ResumePosition::Quiz {
            current_question_index,
            total_questions,
            ..
        } => (
            total_questions.saturating_sub(*current_question_index) as f64 * SECONDS_PER_QUIZ_QUESTION,
            format!("{} / {} questions", current_question_index, total_questions),
            suggestions(
                "Continue quiz",
                format!("Continue at question {}", current_question_index + 1),
                "Restart the quiz from the first question",
            ),
        ),
        ResumePosition::Pdf {
            current_page,
            total_pages,
            ..
        } => (
            total_pages.saturating_sub(*current_page) as f64 * SECONDS_PER_PDF_PAGE,
            format!("{} / {} pages", current_page, total_pages),
            suggestions(
                "Continue reading",
                format!("Continue on page {}", current_page),
                "Read the document again from the first page",
            ),
        ),
    };
    ResumeContext {
        content_type: point.content_type,
        title: title.to_string(),
        estimated_time_remaining: estimated,
        last_access_time: point.timestamp,
        progress_summary: summary,
        suggestions,
    }
}

/// Continue unless the lesson went stale or barely started.
pub fn recommendation(
    point: Option<&ResumePoint>,
    prefs: &ResumePreferences,
    now: DateTime<Utc>,
) -> ResumeAction {
    let Some(point) = point else {
        return ResumeAction::Restart;
    };
    if now - point.timestamp > Duration::days(prefs.stale_after_days) {
        return ResumeAction::Restart;
    }
    if point.completion_percentage < 10.0 {
        return ResumeAction::Restart;
    }
    ResumeAction::Continue
}

//=========================================================================================
// ResumeTracker
//=========================================================================================

pub struct ResumeTracker {
    lesson_id: String,
    title: String,
    prefs: ResumePreferences,
    session_started: DateTime<Utc>,
    point: Option<ResumePoint>,
    context: Option<ResumeContext>,
    show_prompt: bool,
    prompt_armed: bool,
    history: Vec<ResumePoint>,
    storage: Arc<dyn LocalStore>,
}

impl ResumeTracker {
    pub fn new(
        lesson_id: &str,
        title: &str,
        prefs: ResumePreferences,
        storage: Arc<dyn LocalStore>,
        now: DateTime<Utc>,
    ) -> Self {
        let history = storage
            .get(&history_key(lesson_id))
            .and_then(|raw| match serde_json::from_str::<Vec<ResumePoint>>(&raw) {
                Ok(history) => Some(history),
                Err(e) => {
                    warn!(lesson_id, error = %e, "Discarding unreadable resume history.");
                    None
                }
            })
            .unwrap_or_default();
        Self {
            lesson_id: lesson_id.to_string(),
            title: title.to_string(),
            prefs,
            session_started: now,
            point: None,
            context: None,
            show_prompt: false,
            prompt_armed: true,
            history,
            storage,
        }
    }

    /// Recomputes the point for a changed record. Only the first record seen in
    /// the session may raise the prompt.
    pub fn observe(&mut self, record: &ProgressRecord, now: DateTime<Utc>) {
        self.point = compute_resume_point(record, &self.prefs, self.session_started, now);
        self.context = self.point.as_ref().map(|p| resume_context(p, &self.title));
        if self.prompt_armed {
            self.prompt_armed = false;
            self.show_prompt = self.point.is_some() && self.prefs.show_resume_notification;
        }
    }

    /// Consumes the chance to prompt without showing anything.
    pub fn disarm(&mut self) {
        self.prompt_armed = false;
    }

    pub fn point(&self) -> Option<&ResumePoint> {
        self.point.as_ref()
    }

    pub fn context(&self) -> Option<&ResumeContext> {
        self.context.as_ref()
    }

    pub fn show_prompt(&self) -> bool {
        self.show_prompt
    }

    pub fn history(&self) -> &[ResumePoint] {
        &self.history
    }

    pub fn recommendation(&self, now: DateTime<Utc>) -> ResumeAction {
        recommendation(self.point.as_ref(), &self.prefs, now)
    }

    pub fn time_remaining(&self) -> String {
        self.context
            .as_ref()
            .map(|c| format_time_remaining(c.estimated_time_remaining))
            .unwrap_or_default()
    }

    /// Records the current point at the head of the history and hides the prompt.
    pub fn accept(&mut self) -> Option<ResumePoint> {
        self.show_prompt = false;
        let point = self.point.clone()?;
        self.history.insert(0, point.clone());
        self.history.truncate(self.prefs.max_history_items);
        match serde_json::to_string(&self.history) {
            Ok(raw) => {
                if let Err(e) = self.storage.set(&history_key(&self.lesson_id), &raw) {
                    warn!(lesson_id = %self.lesson_id, error = %e, "Failed to persist resume history.");
                }
            }
            Err(e) => warn!(error = %e, "Failed to encode resume history."),
        }
        debug!(lesson_id = %self.lesson_id, history = self.history.len(), "Resume accepted.");
        Some(point)
    }

    pub fn dismiss(&mut self) {
        self.show_prompt = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        ContentProgress, DeviceInfo, LessonKey, QuizProgress, ReadingProgress, VideoProgress,
    };
    use crate::store::MemoryLocalStore;

    fn record(content_type: ContentType, completion: f64) -> ProgressRecord {
        let key = LessonKey {
            user_id: "u1".into(),
            lesson_id: "l1".into(),
            course_id: "c1".into(),
            content_type,
        };
        let device = DeviceInfo {
            id: "device_b".into(),
            name: "mobile - Safari".into(),
            device_type: DeviceType::Mobile,
            browser: "Safari".into(),
            os: "iOS".into(),
            last_seen: Utc::now(),
            is_active: true,
        };
        let mut record = ProgressRecord::new(&key, &device, Utc::now());
        record.completion_percentage = completion;
        record
    }

    fn video(current_time: f64, duration: f64) -> ProgressRecord {
        let mut record = record(ContentType::Video, 20.0);
        record.content = Some(ContentProgress::Video(VideoProgress {
            current_time,
            duration,
            ..Default::default()
        }));
        record
    }

    #[test]
    fn video_floor_uses_resume_threshold() {
        let prefs = ResumePreferences::default();
        let now = Utc::now();
        assert!(compute_resume_point(&video(10.0, 600.0), &prefs, now, now).is_none());
        let point = compute_resume_point(&video(45.0, 600.0), &prefs, now, now).unwrap();
        assert_eq!(point.device.name, "mobile - Safari");
    }

    #[test]
    fn nearly_finished_lessons_are_not_offered() {
        let mut rec = video(500.0, 600.0);
        rec.completion_percentage = 96.0;
        let now = Utc::now();
        assert!(compute_resume_point(&rec, &ResumePreferences::default(), now, now).is_none());
    }

    #[test]
    fn pdf_falls_back_to_last_position() {
        let mut rec = record(ContentType::Pdf, 40.0);
        rec.last_position = 3.25;
        let now = Utc::now();
        let point = compute_resume_point(&rec, &ResumePreferences::default(), now, now).unwrap();
        assert_eq!(
            point.position,
            ResumePosition::Pdf {
                current_page: 3,
                total_pages: 0,
                scroll_position: 0.25,
                zoom_level: 1.0,
            }
        );
    }

    #[test]
    fn context_summaries_per_content_type() {
        let now = Utc::now();
        let prefs = ResumePreferences::default();

        let point = compute_resume_point(&video(754.0, 2710.0), &prefs, now, now).unwrap();
        let ctx = resume_context(&point, "Intro");
        assert_eq!(ctx.progress_summary, "12:34 / 45:10");
        assert_eq!(ctx.estimated_time_remaining, 1956.0);
        assert_eq!(ctx.suggestions[0].description, "Continue from 12:34");

        let mut text = record(ContentType::Text, 62.0);
        text.content = Some(ContentProgress::Text(ReadingProgress {
            scroll_percentage: 62.0,
            ..Default::default()
        }));
        let point = compute_resume_point(&text, &prefs, now, now).unwrap();
        assert_eq!(resume_context(&point, "Essay").progress_summary, "62% read");

        let mut quiz = record(ContentType::Quiz, 35.0);
        quiz.content = Some(ContentProgress::Quiz(QuizProgress {
            current_question_index: 7,
            total_questions: Some(20),
            ..Default::default()
        }));
        let point = compute_resume_point(&quiz, &prefs, now, now).unwrap();
        let ctx = resume_context(&point, "Check");
        assert_eq!(ctx.progress_summary, "7 / 20 questions");
        assert_eq!(ctx.estimated_time_remaining, 13.0 * 120.0);
    }

    #[test]
    fn text_time_remaining_extrapolates_from_progress() {
        let prefs = ResumePreferences::default();
        let now = Utc::now();
        let mut text = record(ContentType::Text, 62.0);
        text.time_spent = 620.0;
        text.content = Some(ContentProgress::Text(ReadingProgress {
            scroll_percentage: 62.0,
            ..Default::default()
        }));
        let point = compute_resume_point(&text, &prefs, now, now).unwrap();
        assert_eq!(resume_context(&point, "Essay").estimated_time_remaining, 380.0);

        // 1240 words in 620s is 120 wpm; 760 words are left.
        text.content = Some(ContentProgress::Text(ReadingProgress {
            scroll_percentage: 62.0,
            words_read: 1240.0,
            ..Default::default()
        }));
        let point = compute_resume_point(&text, &prefs, now, now).unwrap();
        let remaining = resume_context(&point, "Essay").estimated_time_remaining;
        assert!((remaining - 380.0).abs() < 1e-6, "got {}", remaining);
    }

    #[test]
    fn formats_remaining_time() {
        assert_eq!(format_time_remaining(42.0), "42 seconds");
        assert_eq!(format_time_remaining(600.0), "10 minutes");
        assert_eq!(format_time_remaining(7200.0), "2 hours");
    }

    #[test]
    fn recommends_restart_for_stale_or_barely_started_lessons() {
        let prefs = ResumePreferences::default();
        let now = Utc::now();
        let mut point = compute_resume_point(&video(60.0, 600.0), &prefs, now, now).unwrap();
        assert_eq!(recommendation(Some(&point), &prefs, now), ResumeAction::Continue);
        point.completion_percentage = 5.0;
        assert_eq!(recommendation(Some(&point), &prefs, now), ResumeAction::Restart);
        point.completion_percentage = 50.0;
        point.timestamp = now - Duration::days(8);
        assert_eq!(recommendation(Some(&point), &prefs, now), ResumeAction::Restart);
        assert_eq!(recommendation(None, &prefs, now), ResumeAction::Restart);
    }

    #[test]
    fn prompt_only_for_first_record_and_history_is_bounded() {
        let storage = Arc::new(MemoryLocalStore::default());
        let prefs = ResumePreferences {
            max_history_items: 2,
            ..Default::default()
        };
        let now = Utc::now();
        let mut tracker = ResumeTracker::new("l1", "Intro", prefs.clone(), storage.clone(), now);
        tracker.observe(&video(90.0, 600.0), now);
        assert!(tracker.show_prompt());
        for _ in 0..3 {
            assert!(tracker.accept().is_some());
        }
        assert!(!tracker.show_prompt());
        assert_eq!(tracker.history().len(), 2);

        tracker.observe(&video(120.0, 600.0), now);
        assert!(!tracker.show_prompt());

        let reloaded = ResumeTracker::new("l1", "Intro", prefs, storage, now);
        assert_eq!(reloaded.history().len(), 2);
    }
}

//! crates/progress_sync_core/src/metrics.rs
//!
//! Session-scoped interaction telemetry. Interactions are folded into a
//! per-content-type aggregate as they arrive; scores are recomputed on every
//! sampling tick and the tick's time projection is handed to the sync engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::domain::{Bookmark, ContentType, Highlight, PdfAnnotation, ReadingNote, VideoNote};

/// Time only counts as active while the last interaction is this recent.
pub const ACTIVE_WINDOW_SECS: i64 = 30;

/// Rough words-per-scrolled-pixel factor used to estimate reading progress.
const WORDS_PER_SCROLL_PIXEL: f64 = 0.05;

//=========================================================================================
// Interactions
//=========================================================================================

/// One learner interaction. The serde shape is `{"type": "video_seek", "distance": 12.0}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Interaction {
    VideoPause,
    VideoSeek { distance: f64 },
    VideoSpeedChange { rate: f64 },
    VideoQualityChange,
    VideoBookmark { bookmark: Bookmark },
    VideoNote { note: VideoNote },

    TextScroll { distance: f64 },
    TextBacktrack,
    TextHighlight { highlight: Highlight },
    TextNote { note: ReadingNote },
    TextSectionCompleted { section_id: String },

    QuizAnswer {
        question_id: String,
        answer: Value,
        is_correct: bool,
        time_spent: Option<f64>,
    },
    QuizHint { question_id: String },
    QuizSkip { question_id: String },

    AudioPause,
    AudioRewind,
    AudioFastForward { distance: f64 },
    AudioSpeedChange { rate: f64 },
    AudioVolumeChange,

    PdfPageView { page: u32, seconds: f64 },
    PdfZoom { level: f64 },
    PdfAnnotation { annotation: PdfAnnotation },

    Generic { name: String },
}

//=========================================================================================
// Aggregates
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMetrics {
    pub total_watch_time: f64,
    pub active_watch_time: f64,
    pub pause_count: u32,
    pub seek_count: u32,
    pub seek_distance: f64,
    pub rewind_count: u32,
    pub speed_changes: u32,
    pub average_playback_rate: f64,
    pub quality_changes: u32,
    pub interaction_count: u32,
    pub engagement_score: f64,
    pub bookmarks: Vec<Bookmark>,
    pub notes: Vec<VideoNote>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingMetrics {
    pub total_reading_time: f64,
    pub active_reading_time: f64,
    pub scroll_distance: f64,
    pub backtrack_count: u32,
    pub words_per_minute: f64,
    pub interaction_count: u32,
    pub highlights: Vec<Highlight>,
    pub notes: Vec<ReadingNote>,
    pub sections_completed: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionMetrics {
    pub attempts: u32,
    pub time_spent: f64,
    pub hints_used: u32,
    pub final_answer: Value,
    pub is_correct: Option<bool>,
    pub skipped: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizMetrics {
    pub total_attempts: u32,
    pub questions_attempted: u32,
    pub questions_correct: u32,
    pub questions_skipped: u32,
    pub hints_used: u32,
    pub total_time_spent: f64,
    pub answered_time: f64,
    pub average_time_per_question: f64,
    pub interaction_count: u32,
    pub engagement_score: f64,
    pub question_metrics: HashMap<String, QuestionMetrics>,
}

impl QuizMetrics {
    /// Percentage of attempted questions whose latest answer is correct.
    pub fn accuracy(&self) -> f64 {
        if self.questions_attempted == 0 {
            return 0.0;
        }
        self.questions_correct as f64 / self.questions_attempted as f64 * 100.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioMetrics {
    pub total_listen_time: f64,
    pub active_listen_time: f64,
    pub pause_count: u32,
    pub rewind_count: u32,
    pub fast_forward_count: u32,
    pub skip_distance: f64,
    pub speed_changes: u32,
    pub average_playback_rate: f64,
    pub volume_changes: u32,
    pub interaction_count: u32,
    pub engagement_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PdfMetrics {
    pub total_reading_time: f64,
    pub pages_visited: HashSet<u32>,
    pub page_time_spent: HashMap<u32, f64>,
    pub current_page: Option<u32>,
    pub jump_count: u32,
    pub backtrack_count: u32,
    pub zoom_changes: u32,
    pub average_zoom_level: f64,
    pub interaction_count: u32,
    pub annotations: Vec<PdfAnnotation>,
}

/// The running telemetry aggregate for one open lesson.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricAggregate {
    Video(VideoMetrics),
    Text(ReadingMetrics),
    Quiz(QuizMetrics),
    Audio(AudioMetrics),
    Pdf(PdfMetrics),
}

impl MetricAggregate {
    pub fn new(content_type: ContentType) -> Self {
        match content_type {
            ContentType::Video => MetricAggregate::Video(VideoMetrics {
                total_watch_time: 0.0,
                active_watch_time: 0.0,
                pause_count: 0,
                seek_count: 0,
                seek_distance: 0.0,
                rewind_count: 0,
                speed_changes: 0,
                average_playback_rate: 1.0,
                quality_changes: 0,
                interaction_count: 0,
                engagement_score: 0.0,
                bookmarks: Vec::new(),
                notes: Vec::new(),
            }),
            ContentType::Text => MetricAggregate::Text(ReadingMetrics {
                total_reading_time: 0.0,
                active_reading_time: 0.0,
                scroll_distance: 0.0,
                backtrack_count: 0,
                words_per_minute: 0.0,
                interaction_count: 0,
                highlights: Vec::new(),
                notes: Vec::new(),
                sections_completed: Vec::new(),
            }),
            ContentType::Quiz => MetricAggregate::Quiz(QuizMetrics {
                total_attempts: 0,
                questions_attempted: 0,
                questions_correct: 0,
                questions_skipped: 0,
                hints_used: 0,
                total_time_spent: 0.0,
                answered_time: 0.0,
                average_time_per_question: 0.0,
                interaction_count: 0,
                engagement_score: 0.0,
                question_metrics: HashMap::new(),
            }),
            ContentType::Audio => MetricAggregate::Audio(AudioMetrics {
                total_listen_time: 0.0,
                active_listen_time: 0.0,
                pause_count: 0,
                rewind_count: 0,
                fast_forward_count: 0,
                skip_distance: 0.0,
                speed_changes: 0,
                average_playback_rate: 1.0,
                volume_changes: 0,
                interaction_count: 0,
                engagement_score: 0.0,
            }),
            ContentType::Pdf => MetricAggregate::Pdf(PdfMetrics {
                total_reading_time: 0.0,
                pages_visited: HashSet::new(),
                page_time_spent: HashMap::new(),
                current_page: None,
                jump_count: 0,
                backtrack_count: 0,
                zoom_changes: 0,
                average_zoom_level: 1.0,
                interaction_count: 0,
                annotations: Vec::new(),
            }),
        }
    }

    pub fn content_type(&self) -> ContentType {
        match self {
            MetricAggregate::Video(_) => ContentType::Video,
            MetricAggregate::Text(_) => ContentType::Text,
            MetricAggregate::Quiz(_) => ContentType::Quiz,
            MetricAggregate::Audio(_) => ContentType::Audio,
            MetricAggregate::Pdf(_) => ContentType::Pdf,
        }
    }

    /// Seconds the lesson has been open in this session.
    pub fn total_time(&self) -> f64 {
        match self {
            MetricAggregate::Video(m) => m.total_watch_time,
            MetricAggregate::Text(m) => m.total_reading_time,
            MetricAggregate::Quiz(m) => m.total_time_spent,
            MetricAggregate::Audio(m) => m.total_listen_time,
            MetricAggregate::Pdf(m) => m.total_reading_time,
        }
    }

    pub fn engagement_score(&self) -> f64 {
        match self {
            MetricAggregate::Video(m) => m.engagement_score,
            MetricAggregate::Quiz(m) => m.engagement_score,
            MetricAggregate::Audio(m) => m.engagement_score,
            MetricAggregate::Text(_) | MetricAggregate::Pdf(_) => 0.0,
        }
    }

    pub fn interaction_count(&self) -> u32 {
        match self {
            MetricAggregate::Video(m) => m.interaction_count,
            MetricAggregate::Text(m) => m.interaction_count,
            MetricAggregate::Quiz(m) => m.interaction_count,
            MetricAggregate::Audio(m) => m.interaction_count,
            MetricAggregate::Pdf(m) => m.interaction_count,
        }
    }

    fn bump_interactions(&mut self) {
        match self {
            MetricAggregate::Video(m) => m.interaction_count += 1,
            MetricAggregate::Text(m) => m.interaction_count += 1,
            MetricAggregate::Quiz(m) => m.interaction_count += 1,
            MetricAggregate::Audio(m) => m.interaction_count += 1,
            MetricAggregate::Pdf(m) => m.interaction_count += 1,
        }
    }

    /// Folds one interaction into the aggregate. Payloads meant for another
    /// content type only count as generic activity.
    fn record(&mut self, interaction: Interaction) {
        self.bump_interactions();
        match (self, interaction) {
            (MetricAggregate::Video(m), Interaction::VideoPause) => m.pause_count += 1,
            (MetricAggregate::Video(m), Interaction::VideoSeek { distance }) => {
                m.seek_count += 1;
                m.seek_distance += distance.abs();
                if distance < 0.0 {
                    m.rewind_count += 1;
                }
            }
            (MetricAggregate::Video(m), Interaction::VideoSpeedChange { rate }) => {
                m.speed_changes += 1;
                m.average_playback_rate = (m.average_playback_rate + rate) / 2.0;
            }
            (MetricAggregate::Video(m), Interaction::VideoQualityChange) => m.quality_changes += 1,
            (MetricAggregate::Video(m), Interaction::VideoBookmark { bookmark }) => {
                m.bookmarks.push(bookmark)
            }
            (MetricAggregate::Video(m), Interaction::VideoNote { note }) => m.notes.push(note),

            (MetricAggregate::Text(m), Interaction::TextScroll { distance }) => {
                if distance >= 0.0 {
                    m.scroll_distance += distance;
                } else {
                    m.backtrack_count += 1;
                }
            }
            (MetricAggregate::Text(m), Interaction::TextBacktrack) => m.backtrack_count += 1,
            (MetricAggregate::Text(m), Interaction::TextHighlight { highlight }) => {
                m.highlights.push(highlight)
            }
            (MetricAggregate::Text(m), Interaction::TextNote { note }) => m.notes.push(note),
            (MetricAggregate::Text(m), Interaction::TextSectionCompleted { section_id }) => {
                if !m.sections_completed.contains(&section_id) {
                    m.sections_completed.push(section_id);
                }
            }

            (
                MetricAggregate::Quiz(m),
                Interaction::QuizAnswer {
                    question_id,
                    answer,
                    is_correct,
                    time_spent,
                },
            ) => {
                let question = m.question_metrics.entry(question_id).or_default();
                if question.attempts == 0 {
                    m.questions_attempted += 1;
                    if question.skipped {
                        m.questions_skipped = m.questions_skipped.saturating_sub(1);
                    }
                }
                match (question.is_correct, is_correct) {
                    (Some(true), false) => m.questions_correct -= 1,
                    (Some(false) | None, true) => m.questions_correct += 1,
                    _ => {}
                }
                question.attempts += 1;
                question.final_answer = answer;
                question.is_correct = Some(is_correct);
                if let Some(seconds) = time_spent {
                    question.time_spent += seconds.max(0.0);
                    m.answered_time += seconds.max(0.0);
                }
                m.total_attempts += 1;
            }
            (MetricAggregate::Quiz(m), Interaction::QuizHint { question_id }) => {
                m.question_metrics.entry(question_id).or_default().hints_used += 1;
                m.hints_used += 1;
            }
            (MetricAggregate::Quiz(m), Interaction::QuizSkip { question_id }) => {
                let question = m.question_metrics.entry(question_id).or_default();
                if question.attempts == 0 && !question.skipped {
                    question.skipped = true;
                    m.questions_skipped += 1;
                }
            }

            (MetricAggregate::Audio(m), Interaction::AudioPause) => m.pause_count += 1,
            (MetricAggregate::Audio(m), Interaction::AudioRewind) => m.rewind_count += 1,
            (MetricAggregate::Audio(m), Interaction::AudioFastForward { distance }) => {
                m.fast_forward_count += 1;
                m.skip_distance += distance.abs();
            }
            (MetricAggregate::Audio(m), Interaction::AudioSpeedChange { rate }) => {
                m.speed_changes += 1;
                m.average_playback_rate = (m.average_playback_rate + rate) / 2.0;
            }
            (MetricAggregate::Audio(m), Interaction::AudioVolumeChange) => m.volume_changes += 1,

            (MetricAggregate::Pdf(m), Interaction::PdfPageView { page, seconds }) => {
                if let Some(previous) = m.current_page {
                    if page < previous {
                        m.backtrack_count += 1;
                    } else if page > previous + 1 {
                        m.jump_count += 1;
                    }
                }
                m.current_page = Some(page);
                m.pages_visited.insert(page);
                *m.page_time_spent.entry(page).or_insert(0.0) += seconds.max(0.0);
            }
            (MetricAggregate::Pdf(m), Interaction::PdfZoom { level }) => {
                m.zoom_changes += 1;
                // Running mean over the initial level plus every change.
                let samples = m.zoom_changes as f64 + 1.0;
                m.average_zoom_level += (level - m.average_zoom_level) / samples;
            }
            (MetricAggregate::Pdf(m), Interaction::PdfAnnotation { annotation }) => {
                m.annotations.push(annotation)
            }

            _ => {}
        }
    }
}

//=========================================================================================
// Scores
//=========================================================================================

fn clamp_score(score: f64) -> f64 {
    score.round().clamp(0.0, 100.0)
}

/// Shared attentiveness heuristic for time-based media.
fn media_engagement(
    active: f64,
    total: f64,
    interactions: u32,
    pauses: u32,
    seeks: u32,
    bookmarks: usize,
    notes: usize,
) -> f64 {
    let watch_ratio = (active / total.max(1.0)).min(1.0);
    let mut score = watch_ratio * 40.0;
    score += (interactions as f64 / 10.0).min(1.0) * 20.0;
    if pauses > 0 && pauses < 20 {
        score += 10.0;
    }
    if seeks > 0 && seeks < 10 {
        score += 10.0;
    }
    score += (bookmarks as f64 * 5.0 + notes as f64 * 3.0).min(20.0);
    clamp_score(score)
}

pub fn video_engagement(m: &VideoMetrics) -> f64 {
    media_engagement(
        m.active_watch_time,
        m.total_watch_time,
        m.interaction_count,
        m.pause_count,
        m.seek_count,
        m.bookmarks.len(),
        m.notes.len(),
    )
}

pub fn audio_engagement(m: &AudioMetrics) -> f64 {
    media_engagement(
        m.active_listen_time,
        m.total_listen_time,
        m.interaction_count,
        m.pause_count,
        m.rewind_count + m.fast_forward_count,
        0,
        0,
    )
}

/// Estimated words per minute of active reading.
pub fn reading_speed(m: &ReadingMetrics) -> f64 {
    if m.active_reading_time <= 0.0 {
        return 0.0;
    }
    let estimated_words = m.scroll_distance * WORDS_PER_SCROLL_PIXEL;
    estimated_words / (m.active_reading_time / 60.0)
}

pub fn quiz_engagement(m: &QuizMetrics) -> f64 {
    let mut score = 0.0;
    if m.questions_attempted > 0 {
        score += m.questions_correct as f64 / m.questions_attempted as f64 * 50.0;
    }
    if m.average_time_per_question > 0.0 && m.average_time_per_question < 300.0 {
        score += 25.0;
    }
    let retry_rate = m.total_attempts as f64 / m.questions_attempted.max(1) as f64;
    if retry_rate > 1.0 && retry_rate < 3.0 {
        score += 15.0;
    }
    score += (m.hints_used as f64 * 2.0).min(10.0);
    clamp_score(score)
}

//=========================================================================================
// Collector
//=========================================================================================

/// What one sampling tick projects into the progress record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollectorTick {
    pub time_spent: f64,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct MetricCollector {
    aggregate: MetricAggregate,
    started_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    baseline_time_spent: f64,
    tick_interval: Duration,
    active_seconds: f64,
}

impl MetricCollector {
    /// `baseline_time_spent` is the time already recorded for the lesson when it
    /// was opened; session time accumulates on top of it.
    pub fn new(
        content_type: ContentType,
        baseline_time_spent: f64,
        tick_interval: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            aggregate: MetricAggregate::new(content_type),
            started_at: now,
            last_activity: now,
            baseline_time_spent: baseline_time_spent.max(0.0),
            tick_interval,
            active_seconds: 0.0,
        }
    }

    pub fn aggregate(&self) -> &MetricAggregate {
        &self.aggregate
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Seconds of active (non-idle) time accrued so far.
    pub fn active_seconds(&self) -> f64 {
        self.active_seconds
    }

    /// The time the next tick would report at `now`.
    pub fn projected_time(&self, now: DateTime<Utc>) -> f64 {
        self.baseline_time_spent + self.session_seconds(now)
    }

    /// Re-anchors the projection so it reports `time_spent` at `now` and keeps
    /// counting from there. Used after a restart or when another device has
    /// recorded more time.
    pub fn rebase(&mut self, time_spent: f64, now: DateTime<Utc>) {
        self.baseline_time_spent = time_spent.max(0.0) - self.session_seconds(now);
    }

    pub fn track(&mut self, interaction: Interaction, at: DateTime<Utc>) {
        if at > self.last_activity {
            self.last_activity = at;
        }
        self.aggregate.record(interaction);
    }

    fn session_seconds(&self, now: DateTime<Utc>) -> f64 {
        ((now - self.started_at).num_milliseconds() as f64 / 1000.0).max(0.0)
    }

    /// Recomputes derived scores and returns the time projection for the record.
    pub fn tick(&mut self, now: DateTime<Utc>) -> CollectorTick {
        let elapsed = self.session_seconds(now);
        if (now - self.last_activity).num_seconds() < ACTIVE_WINDOW_SECS {
            self.active_seconds += self.tick_interval.as_secs_f64();
        }
        let active = self.active_seconds;

        match &mut self.aggregate {
            MetricAggregate::Video(m) => {
                m.total_watch_time = elapsed;
                m.active_watch_time = active;
                m.engagement_score = video_engagement(m);
            }
            MetricAggregate::Text(m) => {
                m.total_reading_time = elapsed;
                m.active_reading_time = active;
                m.words_per_minute = reading_speed(m);
            }
            MetricAggregate::Quiz(m) => {
                m.total_time_spent = elapsed;
                m.average_time_per_question = if m.questions_attempted == 0 {
                    0.0
                } else if m.answered_time > 0.0 {
                    m.answered_time / m.questions_attempted as f64
                } else {
                    elapsed / m.questions_attempted as f64
                };
                m.engagement_score = quiz_engagement(m);
            }
            MetricAggregate::Audio(m) => {
                m.total_listen_time = elapsed;
                m.active_listen_time = active;
                m.engagement_score = audio_engagement(m);
            }
            MetricAggregate::Pdf(m) => {
                m.total_reading_time = elapsed;
            }
        }

        CollectorTick {
            time_spent: self.baseline_time_spent + elapsed,
            last_updated: now,
        }
    }
}

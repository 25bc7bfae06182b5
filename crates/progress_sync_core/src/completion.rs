//! crates/progress_sync_core/src/completion.rs
//!
//! Declarative completion criteria, their evaluation against the converged
//! record plus session metrics, and the sticky per-session completion tracker
//! that also awards milestones.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::domain::ProgressRecord;
use crate::metrics::{
    AudioMetrics, MetricAggregate, PdfMetrics, QuizMetrics, ReadingMetrics, VideoMetrics,
};

//=========================================================================================
// Criteria
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriteriaKind {
    /// Completion percentage and time thresholds only.
    Basic,
    Advanced,
    Mastery,
    #[default]
    Custom,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompletionCriteria {
    #[serde(rename = "type")]
    pub kind: CriteriaKind,
    pub minimum_time_spent: Option<f64>,
    pub minimum_completion_percentage: Option<f64>,
    pub advanced: Option<AdvancedCriteria>,
    pub video: Option<VideoCriteria>,
    pub text: Option<TextCriteria>,
    pub quiz: Option<QuizCriteria>,
    pub audio: Option<AudioCriteria>,
    pub pdf: Option<PdfCriteria>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdvancedCriteria {
    pub minimum_engagement_score: Option<f64>,
    pub minimum_interaction_count: Option<u32>,
    pub required_sections: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VideoCriteria {
    pub minimum_watch_percentage: f64,
    pub max_skip_percentage: Option<f64>,
    pub required_chapters: Vec<String>,
    pub minimum_engagement_score: Option<f64>,
    pub minimum_playback_rate: Option<f64>,
    pub maximum_playback_rate: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TextCriteria {
    pub minimum_reading_percentage: f64,
    pub minimum_reading_time: Option<f64>,
    pub required_sections: Vec<String>,
    pub minimum_words_per_minute: Option<f64>,
    pub minimum_highlights: Option<usize>,
    pub minimum_notes: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QuizCriteria {
    /// Minimum accuracy (percent of attempted questions answered correctly).
    pub minimum_score: f64,
    pub max_attempts: Option<u32>,
    pub required_questions: Vec<String>,
    pub minimum_accuracy: Option<f64>,
    pub require_all_correct: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AudioCriteria {
    pub minimum_listen_percentage: f64,
    pub max_skip_percentage: Option<f64>,
    pub minimum_engagement_score: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PdfCriteria {
    pub minimum_pages_read: usize,
    pub minimum_time_per_page: Option<f64>,
    pub required_pages: Vec<u32>,
    pub minimum_annotations: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionOutcome {
    pub completed: bool,
    pub score: f64,
}

//=========================================================================================
// Evaluation
//=========================================================================================

fn at_least<T: PartialOrd>(value: T, floor: Option<T>) -> bool {
    floor.map_or(true, |floor| value >= floor)
}

fn at_most<T: PartialOrd>(value: T, ceiling: Option<T>) -> bool {
    ceiling.map_or(true, |ceiling| value <= ceiling)
}

fn skip_percentage(distance: f64, total: f64) -> f64 {
    if total <= 0.0 {
        0.0
    } else {
        distance / total * 100.0
    }
}

/// Ids of completed sections (text) or chapters (video), from the record plus
/// the sections completed during this session.
fn completed_sections(record: &ProgressRecord, session: &[String]) -> HashSet<String> {
    let mut sections = HashSet::new();
    if let Some(reading) = record.reading() {
        sections.extend(reading.sections_completed.iter().cloned());
    }
    if let Some(video) = record.video() {
        sections.extend(
            video
                .chapters
                .iter()
                .filter(|c| c.completed)
                .map(|c| c.id.clone()),
        );
    }
    sections.extend(session.iter().cloned());
    sections
}

fn check_video(record: &ProgressRecord, m: &VideoMetrics, c: &VideoCriteria) -> CompletionOutcome {
    let completion = record.completion_percentage;
    let chapters = completed_sections(record, &[]);
    let completed = completion >= c.minimum_watch_percentage
        && at_least(m.engagement_score, c.minimum_engagement_score)
        && at_most(
            skip_percentage(m.seek_distance, m.total_watch_time),
            c.max_skip_percentage,
        )
        && c.required_chapters.iter().all(|id| chapters.contains(id))
        && at_least(m.average_playback_rate, c.minimum_playback_rate)
        && at_most(m.average_playback_rate, c.maximum_playback_rate);
    CompletionOutcome {
        completed,
        score: completion.min(m.engagement_score),
    }
}

fn check_text(record: &ProgressRecord, m: &ReadingMetrics, c: &TextCriteria) -> CompletionOutcome {
    let completion = record.completion_percentage;
    let sections = completed_sections(record, &m.sections_completed);
    let completed = completion >= c.minimum_reading_percentage
        && at_least(m.total_reading_time, c.minimum_reading_time)
        && at_least(m.highlights.len(), c.minimum_highlights)
        && at_least(m.notes.len(), c.minimum_notes)
        && c.required_sections.iter().all(|id| sections.contains(id))
        && at_least(m.words_per_minute, c.minimum_words_per_minute);
    CompletionOutcome {
        completed,
        score: completion,
    }
}

fn check_quiz(m: &QuizMetrics, c: &QuizCriteria) -> CompletionOutcome {
    let accuracy = m.accuracy();
    let all_correct = m.questions_attempted > 0 && m.questions_correct == m.questions_attempted;
    let required_correct = c.required_questions.iter().all(|id| {
        m.question_metrics
            .get(id)
            .is_some_and(|q| q.is_correct == Some(true))
    });
    let completed = accuracy >= c.minimum_score
        && at_most(m.total_attempts, c.max_attempts)
        && at_least(accuracy, c.minimum_accuracy)
        && (!c.require_all_correct || all_correct)
        && required_correct;
    CompletionOutcome {
        completed,
        score: accuracy.min(m.engagement_score),
    }
}

fn check_audio(record: &ProgressRecord, m: &AudioMetrics, c: &AudioCriteria) -> CompletionOutcome {
    let completion = record.completion_percentage;
    let completed = completion >= c.minimum_listen_percentage
        && at_most(
            skip_percentage(m.skip_distance, m.total_listen_time),
            c.max_skip_percentage,
        )
        && at_least(m.engagement_score, c.minimum_engagement_score);
    CompletionOutcome {
        completed,
        score: completion,
    }
}

fn check_pdf(record: &ProgressRecord, m: &PdfMetrics, c: &PdfCriteria) -> CompletionOutcome {
    let mut pages: HashSet<u32> = m.pages_visited.clone();
    if let Some(pdf) = record.pdf() {
        pages.extend(pdf.pages_completed.iter().copied());
    }
    let time_per_page_ok = c.minimum_time_per_page.map_or(true, |floor| {
        m.page_time_spent.values().all(|seconds| *seconds >= floor)
    });
    let completed = pages.len() >= c.minimum_pages_read
        && time_per_page_ok
        && c.required_pages.iter().all(|page| pages.contains(page))
        && at_least(m.annotations.len(), c.minimum_annotations);
    CompletionOutcome {
        completed,
        score: record.completion_percentage,
    }
}

fn check_advanced(
    record: &ProgressRecord,
    metrics: &MetricAggregate,
    c: &AdvancedCriteria,
) -> bool {
    let session: &[String] = match metrics {
        MetricAggregate::Text(m) => &m.sections_completed,
        _ => &[],
    };
    let sections = completed_sections(record, session);
    at_least(metrics.engagement_score(), c.minimum_engagement_score)
        && at_least(metrics.interaction_count(), c.minimum_interaction_count)
        && c.required_sections.iter().all(|id| sections.contains(id))
}

/// Evaluates `criteria` for the record's content type.
pub fn evaluate(
    record: &ProgressRecord,
    metrics: &MetricAggregate,
    criteria: &CompletionCriteria,
) -> CompletionOutcome {
    let completion = record.completion_percentage;

    if criteria.kind == CriteriaKind::Basic {
        let completed = completion >= criteria.minimum_completion_percentage.unwrap_or(0.0)
            && metrics.total_time() >= criteria.minimum_time_spent.unwrap_or(0.0);
        return CompletionOutcome {
            completed,
            score: if completed { 100.0 } else { completion },
        };
    }

    let content = match metrics {
        MetricAggregate::Video(m) => criteria.video.as_ref().map(|c| check_video(record, m, c)),
        MetricAggregate::Text(m) => criteria.text.as_ref().map(|c| check_text(record, m, c)),
        MetricAggregate::Quiz(m) => criteria.quiz.as_ref().map(|c| check_quiz(m, c)),
        MetricAggregate::Audio(m) => criteria.audio.as_ref().map(|c| check_audio(record, m, c)),
        MetricAggregate::Pdf(m) => criteria.pdf.as_ref().map(|c| check_pdf(record, m, c)),
    };
    let advanced = criteria
        .advanced
        .as_ref()
        .map(|c| check_advanced(record, metrics, c));

    match (content, advanced) {
        (None, None) => CompletionOutcome {
            completed: false,
            score: completion,
        },
        (Some(outcome), None) => outcome,
        (Some(outcome), Some(advanced)) => CompletionOutcome {
            completed: outcome.completed && advanced,
            score: outcome.score,
        },
        (None, Some(advanced)) => CompletionOutcome {
            completed: advanced,
            score: completion,
        },
    }
}

//=========================================================================================
// Milestones
//=========================================================================================

pub const MILESTONE_25_PERCENT: &str = "25_percent";
pub const MILESTONE_50_PERCENT: &str = "50_percent";
pub const MILESTONE_75_PERCENT: &str = "75_percent";
pub const MILESTONE_BOOKMARK_CREATOR: &str = "bookmark_creator";
pub const MILESTONE_NOTE_TAKER: &str = "note_taker";
pub const MILESTONE_HIGHLY_ENGAGED: &str = "highly_engaged";
pub const MILESTONE_HIGHLIGHTER: &str = "highlighter";
pub const MILESTONE_SPEED_READER: &str = "speed_reader";
pub const MILESTONE_QUIZ_MASTER: &str = "quiz_master";
pub const MILESTONE_PERFECTIONIST: &str = "perfectionist";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Milestone {
    pub id: String,
    pub completion_percentage: f64,
    pub reached_at: DateTime<Utc>,
}

/// Every milestone id the record and metrics currently qualify for.
pub fn qualifying_milestones(
    record: &ProgressRecord,
    metrics: &MetricAggregate,
) -> Vec<&'static str> {
    let completion = record.completion_percentage;
    let mut ids = Vec::new();
    for (threshold, id) in [
        (25.0, MILESTONE_25_PERCENT),
        (50.0, MILESTONE_50_PERCENT),
        (75.0, MILESTONE_75_PERCENT),
    ] {
        if completion >= threshold {
            ids.push(id);
        }
    }
    match metrics {
        MetricAggregate::Video(m) => {
            if m.bookmarks.len() >= 3 {
                ids.push(MILESTONE_BOOKMARK_CREATOR);
            }
            if m.notes.len() >= 5 {
                ids.push(MILESTONE_NOTE_TAKER);
            }
            if m.engagement_score >= 80.0 {
                ids.push(MILESTONE_HIGHLY_ENGAGED);
            }
        }
        MetricAggregate::Text(m) => {
            if m.highlights.len() >= 10 {
                ids.push(MILESTONE_HIGHLIGHTER);
            }
            if m.words_per_minute >= 250.0 {
                ids.push(MILESTONE_SPEED_READER);
            }
        }
        MetricAggregate::Quiz(m) => {
            if m.questions_correct >= 10 {
                ids.push(MILESTONE_QUIZ_MASTER);
            }
            if m.engagement_score >= 90.0 {
                ids.push(MILESTONE_PERFECTIONIST);
            }
        }
        MetricAggregate::Audio(_) | MetricAggregate::Pdf(_) => {}
    }
    ids
}

//=========================================================================================
// CompletionTracker
//=========================================================================================

/// Sticky completion state for one open lesson.
#[derive(Debug, Clone, Default)]
pub struct CompletionTracker {
    criteria: Option<CompletionCriteria>,
    completed: bool,
    score: f64,
    milestones: Vec<Milestone>,
}

impl CompletionTracker {
    pub fn new(criteria: Option<CompletionCriteria>) -> Self {
        Self {
            criteria,
            ..Default::default()
        }
    }

    /// Marks a lesson that was already completed elsewhere without emitting
    /// a completion.
    pub fn seed(&mut self, record: &ProgressRecord) {
        if record.is_completed && !self.completed {
            self.completed = true;
            self.score = record.completion_percentage;
        }
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn milestones(&self) -> &[Milestone] {
        &self.milestones
    }

    /// Returns the outcome the first time the criteria are met, and `None`
    /// otherwise (including every later call).
    pub fn check(
        &mut self,
        record: &ProgressRecord,
        metrics: &MetricAggregate,
    ) -> Option<CompletionOutcome> {
        if self.completed {
            return None;
        }
        let criteria = self.criteria.as_ref()?;
        let outcome = evaluate(record, metrics, criteria);
        if !outcome.completed {
            return None;
        }
        self.completed = true;
        self.score = outcome.score;
        Some(outcome)
    }

    /// Milestones reached for the first time in this session.
    pub fn check_milestones(
        &mut self,
        record: &ProgressRecord,
        metrics: &MetricAggregate,
        now: DateTime<Utc>,
    ) -> Vec<Milestone> {
        let mut reached = Vec::new();
        for id in qualifying_milestones(record, metrics) {
            if self.milestones.iter().any(|m| m.id == id) {
                continue;
            }
            let milestone = Milestone {
                id: id.to_string(),
                completion_percentage: record.completion_percentage,
                reached_at: now,
            };
            self.milestones.push(milestone.clone());
            reached.push(milestone);
        }
        reached
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        Bookmark, ContentProgress, ContentType, DeviceType, Highlight, LessonKey, VideoProgress,
    };
    use crate::metrics::{Interaction, MetricCollector};
    use serde_json::Value;
    use std::time::Duration;

    fn record(content_type: ContentType, completion: f64) -> ProgressRecord {
        let key = LessonKey {
            user_id: "u1".into(),
            lesson_id: "l1".into(),
            course_id: "c1".into(),
            content_type,
        };
        let device = crate::domain::DeviceInfo {
            id: "device_a".into(),
            name: "desktop - Chrome".into(),
            device_type: DeviceType::Desktop,
            browser: "Chrome".into(),
            os: "Linux".into(),
            last_seen: Utc::now(),
            is_active: true,
        };
        let mut record = ProgressRecord::new(&key, &device, Utc::now());
        record.completion_percentage = completion;
        record
    }

    fn quiz_metrics(correct: usize, wrong: usize) -> MetricAggregate {
        let now = Utc::now();
        let mut collector = MetricCollector::new(ContentType::Quiz, 0.0, Duration::from_secs(5), now);
        for i in 0..(correct + wrong) {
            collector.track(
                Interaction::QuizAnswer {
                    question_id: format!("q{}", i),
                    answer: Value::from(i),
                    is_correct: i < correct,
                    time_spent: Some(30.0),
                },
                now,
            );
        }
        collector.tick(now + chrono::Duration::seconds(5));
        collector.aggregate().clone()
    }

    #[test]
    fn criteria_deserialize_with_type_tag() {
        let criteria: CompletionCriteria = serde_json::from_str(
            r#"{"type":"custom","quiz":{"minimumScore":70,"requireAllCorrect":false}}"#,
        )
        .unwrap();
        assert_eq!(criteria.kind, CriteriaKind::Custom);
        assert_eq!(criteria.quiz.unwrap().minimum_score, 70.0);
    }

    #[test]
    fn basic_criteria_use_completion_and_session_time() {
        let criteria = CompletionCriteria {
            kind: CriteriaKind::Basic,
            minimum_completion_percentage: Some(80.0),
            minimum_time_spent: Some(5.0),
            ..Default::default()
        };
        let metrics = quiz_metrics(1, 0);
        let done = evaluate(&record(ContentType::Quiz, 85.0), &metrics, &criteria);
        assert_eq!(done, CompletionOutcome { completed: true, score: 100.0 });
        let not_yet = evaluate(&record(ContentType::Quiz, 60.0), &metrics, &criteria);
        assert_eq!(not_yet, CompletionOutcome { completed: false, score: 60.0 });
    }

    #[test]
    fn quiz_accuracy_against_minimum_score() {
        let criteria = CompletionCriteria {
            quiz: Some(QuizCriteria {
                minimum_score: 70.0,
                ..Default::default()
            }),
            ..Default::default()
        };
        let passing = evaluate(&record(ContentType::Quiz, 0.0), &quiz_metrics(8, 2), &criteria);
        assert!(passing.completed);
        let failing = evaluate(&record(ContentType::Quiz, 0.0), &quiz_metrics(6, 4), &criteria);
        assert!(!failing.completed);

        let strict = CompletionCriteria {
            quiz: Some(QuizCriteria {
                minimum_score: 70.0,
                require_all_correct: true,
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(!evaluate(&record(ContentType::Quiz, 0.0), &quiz_metrics(8, 2), &strict).completed);
    }

    #[test]
    fn video_requires_chapters_and_advanced_block() {
        let mut rec = record(ContentType::Video, 95.0);
        rec.content = Some(ContentProgress::Video(VideoProgress {
            chapters: vec![crate::domain::ChapterProgress {
                id: "intro".into(),
                completed: true,
                time_spent: 60.0,
            }],
            ..Default::default()
        }));
        let metrics = MetricAggregate::new(ContentType::Video);
        let mut criteria = CompletionCriteria {
            video: Some(VideoCriteria {
                minimum_watch_percentage: 90.0,
                required_chapters: vec!["intro".into()],
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(evaluate(&rec, &metrics, &criteria).completed);

        criteria.advanced = Some(AdvancedCriteria {
            minimum_interaction_count: Some(3),
            ..Default::default()
        });
        assert!(!evaluate(&rec, &metrics, &criteria).completed);
    }

    #[test]
    fn no_applicable_block_never_completes() {
        let criteria = CompletionCriteria {
            video: Some(VideoCriteria::default()),
            ..Default::default()
        };
        let metrics = MetricAggregate::new(ContentType::Pdf);
        assert!(!evaluate(&record(ContentType::Pdf, 100.0), &metrics, &criteria).completed);
    }

    #[test]
    fn tracker_is_sticky_and_fires_once() {
        let criteria = CompletionCriteria {
            quiz: Some(QuizCriteria {
                minimum_score: 70.0,
                ..Default::default()
            }),
            ..Default::default()
        };
        let mut tracker = CompletionTracker::new(Some(criteria));
        let rec = record(ContentType::Quiz, 0.0);
        assert!(tracker.check(&rec, &quiz_metrics(8, 2)).is_some());
        assert!(tracker.check(&rec, &quiz_metrics(8, 2)).is_none());
        assert!(tracker.check(&rec, &quiz_metrics(0, 10)).is_none());
        assert!(tracker.is_completed());
    }

    #[test]
    fn milestones_are_emitted_once_each() {
        let mut tracker = CompletionTracker::new(None);
        let metrics = MetricAggregate::new(ContentType::Text);
        let now = Utc::now();
        let first = tracker.check_milestones(&record(ContentType::Text, 55.0), &metrics, now);
        let ids: Vec<&str> = first.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec![MILESTONE_25_PERCENT, MILESTONE_50_PERCENT]);
        let second = tracker.check_milestones(&record(ContentType::Text, 80.0), &metrics, now);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, MILESTONE_75_PERCENT);
        assert_eq!(tracker.milestones().len(), 3);
    }

    fn ids(milestones: &[Milestone]) -> Vec<&str> {
        milestones.iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn bookmark_creator_needs_three_bookmarks_and_fires_once() {
        let now = Utc::now();
        let mut collector = MetricCollector::new(ContentType::Video, 0.0, Duration::from_secs(5), now);
        let mut tracker = CompletionTracker::new(None);
        let rec = record(ContentType::Video, 10.0);

        for i in 0..3 {
            collector.track(
                Interaction::VideoBookmark {
                    bookmark: Bookmark {
                        id: format!("b{}", i),
                        timestamp: 30.0 * i as f64,
                        title: format!("Bookmark {}", i),
                        note: None,
                    },
                },
                now,
            );
            collector.tick(now + chrono::Duration::seconds(5));
            let reached = tracker.check_milestones(&rec, collector.aggregate(), now);
            assert_eq!(ids(&reached).contains(&MILESTONE_BOOKMARK_CREATOR), i == 2);
        }

        collector.tick(now + chrono::Duration::seconds(10));
        let again = tracker.check_milestones(&rec, collector.aggregate(), now);
        assert!(!ids(&again).contains(&MILESTONE_BOOKMARK_CREATOR));
        let earned = tracker
            .milestones()
            .iter()
            .filter(|m| m.id == MILESTONE_BOOKMARK_CREATOR)
            .count();
        assert_eq!(earned, 1);
    }

    #[test]
    fn reading_badges_follow_highlights_and_speed() {
        let now = Utc::now();
        let mut collector = MetricCollector::new(ContentType::Text, 0.0, Duration::from_secs(5), now);
        for i in 0..9 {
            collector.track(
                Interaction::TextHighlight {
                    highlight: Highlight {
                        id: format!("h{}", i),
                        ..Default::default()
                    },
                },
                now,
            );
        }
        let rec = record(ContentType::Text, 0.0);
        assert!(qualifying_milestones(&rec, collector.aggregate()).is_empty());

        collector.track(
            Interaction::TextHighlight {
                highlight: Highlight {
                    id: "h9".into(),
                    ..Default::default()
                },
            },
            now,
        );
        assert_eq!(
            qualifying_milestones(&rec, collector.aggregate()),
            vec![MILESTONE_HIGHLIGHTER]
        );

        let mut fast = MetricAggregate::new(ContentType::Text);
        if let MetricAggregate::Text(m) = &mut fast {
            m.words_per_minute = 249.0;
        }
        assert!(qualifying_milestones(&rec, &fast).is_empty());
        if let MetricAggregate::Text(m) = &mut fast {
            m.words_per_minute = 250.0;
        }
        assert_eq!(qualifying_milestones(&rec, &fast), vec![MILESTONE_SPEED_READER]);
    }

    #[test]
    fn quiz_master_needs_ten_correct_answers() {
        let rec = record(ContentType::Quiz, 0.0);
        assert!(!qualifying_milestones(&rec, &quiz_metrics(9, 1)).contains(&MILESTONE_QUIZ_MASTER));

        // 100% accuracy and a sane pace score 75, short of the perfectionist badge.
        let metrics = quiz_metrics(10, 0);
        assert_eq!(metrics.engagement_score(), 75.0);
        assert_eq!(qualifying_milestones(&rec, &metrics), vec![MILESTONE_QUIZ_MASTER]);

        let mut perfect = metrics.clone();
        if let MetricAggregate::Quiz(m) = &mut perfect {
            m.engagement_score = 90.0;
        }
        assert_eq!(
            qualifying_milestones(&rec, &perfect),
            vec![MILESTONE_QUIZ_MASTER, MILESTONE_PERFECTIONIST]
        );
    }
}

use std::collections::BTreeSet;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Hours shown on the calendar timeline (6 AM through 11 PM).
pub const TIMELINE_HOURS: RangeInclusive<u8> = 6..=23;

/// Largest hour an event may start at.
pub const MAX_START_HOUR: u8 = 23;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskCategory {
    Work,
    #[default]
    Personal,
    Health,
    Urgent,
}

impl TaskCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskCategory::Work => "work",
            TaskCategory::Personal => "personal",
            TaskCategory::Health => "health",
            TaskCategory::Urgent => "urgent",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    pub category: TaskCategory,
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    pub priority: Priority,
}

impl Task {
    pub fn new(id: String, title: impl Into<String>, category: TaskCategory) -> Self {
        Self {
            id,
            title: title.into(),
            category,
            completed: false,
            time: None,
            priority: Priority::Medium,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Habit {
    pub id: String,
    pub title: String,
    pub streak: u32,
    pub completed_today: bool,
    pub color: String,
    /// Days the habit was completed. Only maintained in dated mode.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub completions: BTreeSet<NaiveDate>,
}

impl Habit {
    pub fn new(id: impl Into<String>, title: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            streak: 0,
            completed_today: false,
            color: color.into(),
            completions: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    pub id: String,
    pub title: String,
    pub start_hour: u8,
    pub category: String,
}

impl CalendarEvent {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        start_hour: u8,
        category: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            start_hour,
            category: category.into(),
        }
    }
}

pub fn seed_tasks() -> Vec<Task> {
    Vec::new()
}

pub fn seed_habits() -> Vec<Habit> {
    vec![
        Habit::new("h1", "Scriture Study", "#6366f1"),
        Habit::new("h2", "Pray", "#f43f5e"),
        Habit::new("h3", "Home work", "#10b981"),
    ]
}

pub fn seed_events() -> Vec<CalendarEvent> {
    Vec::new()
}

/// Hands out millisecond timestamps as ids, bumping past the previous value
/// when two ids are requested within the same millisecond.
#[derive(Debug, Default)]
pub struct IdGenerator {
    last: AtomicI64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> String {
        let now = Utc::now().timestamp_millis();
        let previous = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(now);
        now.max(previous + 1).to_string()
    }
}

/// Label an hour the way the timeline does, e.g. `9 AM`, `12 PM`.
pub fn format_hour(hour: u8) -> String {
    let suffix = if hour >= 12 { "PM" } else { "AM" };
    let display = match hour % 12 {
        0 => 12,
        other => other,
    };
    format!("{} {}", display, suffix)
}

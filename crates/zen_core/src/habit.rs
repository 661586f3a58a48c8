use std::collections::BTreeSet;

use chrono::{Duration, Local, NaiveDate};
use parking_lot::RwLock;

use crate::model::Habit;

/// How habit completion is tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HabitMode {
    /// A single `completedToday` flag; the streak moves by one on every
    /// toggle and nothing rolls over at midnight.
    #[default]
    Flag,
    /// Completion is recorded per calendar day and `completedToday`/`streak`
    /// are derived from that history.
    Dated,
}

impl HabitMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "flag" | "legacy" => Some(HabitMode::Flag),
            "dated" | "date" => Some(HabitMode::Dated),
            _ => None,
        }
    }
}

/// Source of "today" for date-scoped habits.
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// Manually driven clock for tests and replays.
#[derive(Debug)]
pub struct FixedClock {
    today: RwLock<NaiveDate>,
}

impl FixedClock {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            today: RwLock::new(today),
        }
    }

    pub fn set(&self, today: NaiveDate) {
        *self.today.write() = today;
    }

    pub fn advance_days(&self, days: i64) {
        let mut today = self.today.write();
        *today += Duration::days(days);
    }
}

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        *self.today.read()
    }
}

pub fn toggle(habit: &mut Habit, mode: HabitMode, today: NaiveDate) {
    match mode {
        HabitMode::Flag => toggle_flag(habit),
        HabitMode::Dated => toggle_dated(habit, today),
    }
}

fn toggle_flag(habit: &mut Habit) {
    let completed = !habit.completed_today;
    habit.completed_today = completed;
    habit.streak = if completed {
        habit.streak.saturating_add(1)
    } else {
        habit.streak.saturating_sub(1)
    };
}

fn toggle_dated(habit: &mut Habit, today: NaiveDate) {
    if habit.completions.is_empty() {
        seed_history_from_counters(habit, today);
    }
    if !habit.completions.remove(&today) {
        habit.completions.insert(today);
    }
    derive_for_day(habit, today);
}

/// Rebuild a completion history matching the stored flag and streak of a
/// habit saved without one: the run ends today when `completed_today` is
/// set, otherwise yesterday.
fn seed_history_from_counters(habit: &mut Habit, today: NaiveDate) {
    let (mut day, length) = if habit.completed_today {
        (Some(today), habit.streak.max(1))
    } else {
        (today.pred_opt(), habit.streak)
    };
    for _ in 0..length {
        let Some(current) = day else {
            break;
        };
        habit.completions.insert(current);
        day = current.pred_opt();
    }
}

/// Recompute `completed_today` and `streak` from the completion history.
pub fn derive_for_day(habit: &mut Habit, today: NaiveDate) {
    habit.completed_today = habit.completions.contains(&today);
    habit.streak = current_streak(&habit.completions, today);
}

/// Consecutive completed days ending today, or ending yesterday while today
/// is still open.
pub fn current_streak(completions: &BTreeSet<NaiveDate>, today: NaiveDate) -> u32 {
    let mut day = if completions.contains(&today) {
        today
    } else {
        match today.pred_opt() {
            Some(yesterday) => yesterday,
            None => return 0,
        }
    };

    let mut streak = 0;
    while completions.contains(&day) {
        streak += 1;
        let Some(previous) = day.pred_opt() else {
            break;
        };
        day = previous;
    }
    streak
}

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::{
    habit::{self, Clock, HabitMode, SystemClock},
    model::{
        seed_events, seed_habits, seed_tasks, CalendarEvent, Habit, IdGenerator, Task,
        TaskCategory, MAX_START_HOUR, TIMELINE_HOURS,
    },
    storage::{
        CorruptDataPolicy, KeyValueStore, MemoryStore, Persistence, EVENTS_KEY, HABITS_KEY,
        TASKS_KEY,
    },
};

/// Result of a state mutation that did not fail outright.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Applied,
    /// No entity with the given id; nothing was changed or written.
    NotFound,
    /// The input was refused before touching state.
    Rejected(&'static str),
}

impl Mutation {
    pub fn is_applied(&self) -> bool {
        matches!(self, Mutation::Applied)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskProgress {
    pub completed: usize,
    pub total: usize,
}

impl TaskProgress {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.completed as f64 / self.total as f64 * 100.0
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreSnapshot {
    pub tasks: Vec<Task>,
    pub habits: Vec<Habit>,
    pub events: Vec<CalendarEvent>,
}

/// Owner of the live task, habit and event collections. Every accepted
/// mutation is written through to storage before it becomes visible.
pub struct PlannerStore {
    persistence: Persistence,
    habit_mode: HabitMode,
    clock: Arc<dyn Clock>,
    ids: IdGenerator,
    tasks: Vec<Task>,
    habits: Vec<Habit>,
    events: Vec<CalendarEvent>,
}

pub struct PlannerStoreBuilder {
    backend: Option<Arc<dyn KeyValueStore>>,
    habit_mode: HabitMode,
    policy: CorruptDataPolicy,
    clock: Option<Arc<dyn Clock>>,
}

impl PlannerStoreBuilder {
    pub fn new() -> Self {
        Self {
            backend: None,
            habit_mode: HabitMode::default(),
            policy: CorruptDataPolicy::default(),
            clock: None,
        }
    }

    pub fn with_storage(mut self, backend: Arc<dyn KeyValueStore>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_habit_mode(mut self, mode: HabitMode) -> Self {
        self.habit_mode = mode;
        self
    }

    pub fn with_corrupt_data_policy(mut self, policy: CorruptDataPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<PlannerStore> {
        let backend = self
            .backend
            .unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let mut store = PlannerStore {
            persistence: Persistence::new(backend, self.policy),
            habit_mode: self.habit_mode,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            ids: IdGenerator::new(),
            tasks: Vec::new(),
            habits: Vec::new(),
            events: Vec::new(),
        };
        store.reload()?;
        store.refresh_day()?;
        Ok(store)
    }
}

impl Default for PlannerStoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PlannerStore {
    pub fn builder() -> PlannerStoreBuilder {
        PlannerStoreBuilder::new()
    }

    pub fn habit_mode(&self) -> HabitMode {
        self.habit_mode
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn habits(&self) -> &[Habit] {
        &self.habits
    }

    pub fn events(&self) -> &[CalendarEvent] {
        &self.events
    }

    pub fn task_titles(&self) -> Vec<String> {
        self.tasks.iter().map(|task| task.title.clone()).collect()
    }

    pub fn task_progress(&self) -> TaskProgress {
        TaskProgress {
            completed: self.tasks.iter().filter(|task| task.completed).count(),
            total: self.tasks.len(),
        }
    }

    pub fn events_at_hour(&self, hour: u8) -> Vec<&CalendarEvent> {
        self.events
            .iter()
            .filter(|event| event.start_hour == hour)
            .collect()
    }

    /// Events grouped under each visible timeline hour, empty hours included.
    pub fn timeline(&self) -> Vec<(u8, Vec<&CalendarEvent>)> {
        TIMELINE_HOURS
            .map(|hour| (hour, self.events_at_hour(hour)))
            .collect()
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            tasks: self.tasks.clone(),
            habits: self.habits.clone(),
            events: self.events.clone(),
        }
    }

    pub fn add_personal_task(&mut self, title: &str) -> Result<Mutation> {
        self.add_task(title, TaskCategory::Personal)
    }

    /// Prepend a new task so the list reads newest first.
    #[instrument(skip(self))]
    pub fn add_task(&mut self, title: &str, category: TaskCategory) -> Result<Mutation> {
        let title = title.trim();
        if title.is_empty() {
            return Ok(Mutation::Rejected("task title is empty"));
        }
        let task = Task::new(self.ids.next_id(), title, category);
        info!(id = %task.id, "adding task");
        let mut next = Vec::with_capacity(self.tasks.len() + 1);
        next.push(task);
        next.extend(self.tasks.iter().cloned());
        self.commit_tasks(next)?;
        Ok(Mutation::Applied)
    }

    #[instrument(skip(self))]
    pub fn toggle_task(&mut self, id: &str) -> Result<Mutation> {
        let Some(index) = self.tasks.iter().position(|task| task.id == id) else {
            debug!("toggle on unknown task ignored");
            return Ok(Mutation::NotFound);
        };
        let mut next = self.tasks.clone();
        next[index].completed = !next[index].completed;
        self.commit_tasks(next)?;
        Ok(Mutation::Applied)
    }

    #[instrument(skip(self))]
    pub fn toggle_habit(&mut self, id: &str) -> Result<Mutation> {
        let Some(index) = self.habits.iter().position(|habit| habit.id == id) else {
            debug!("toggle on unknown habit ignored");
            return Ok(Mutation::NotFound);
        };
        let mut next = self.habits.clone();
        habit::toggle(&mut next[index], self.habit_mode, self.clock.today());
        debug!(
            streak = next[index].streak,
            completed_today = next[index].completed_today,
            "habit toggled"
        );
        self.commit_habits(next)?;
        Ok(Mutation::Applied)
    }

    /// Build an event with a fresh id; it is not stored until [`Self::add_event`].
    pub fn new_event(&self, title: &str, start_hour: u8, category: &str) -> CalendarEvent {
        CalendarEvent::new(self.ids.next_id(), title.trim(), start_hour, category)
    }

    /// Insert an event, keeping the collection stably ordered by start hour.
    #[instrument(skip(self, event), fields(id = %event.id, start_hour = event.start_hour))]
    pub fn add_event(&mut self, event: CalendarEvent) -> Result<Mutation> {
        if event.title.trim().is_empty() {
            return Ok(Mutation::Rejected("event title is empty"));
        }
        if event.start_hour > MAX_START_HOUR {
            return Ok(Mutation::Rejected("event start hour must be between 0 and 23"));
        }
        let mut next = self.events.clone();
        next.push(event);
        next.sort_by_key(|event| event.start_hour);
        self.commit_events(next)?;
        Ok(Mutation::Applied)
    }

    #[instrument(skip(self))]
    pub fn remove_event(&mut self, id: &str) -> Result<Mutation> {
        if !self.events.iter().any(|event| event.id == id) {
            debug!("remove on unknown event ignored");
            return Ok(Mutation::NotFound);
        }
        let next: Vec<CalendarEvent> = self
            .events
            .iter()
            .filter(|event| event.id != id)
            .cloned()
            .collect();
        self.commit_events(next)?;
        Ok(Mutation::Applied)
    }

    /// Re-derive date-scoped habit state for the current day. Returns whether
    /// anything changed. Habits without a completion history keep their
    /// stored counters.
    pub fn refresh_day(&mut self) -> Result<bool> {
        if self.habit_mode != HabitMode::Dated {
            return Ok(false);
        }
        let today = self.clock.today();
        let mut next = self.habits.clone();
        for habit in next.iter_mut().filter(|habit| !habit.completions.is_empty()) {
            habit::derive_for_day(habit, today);
        }
        if next == self.habits {
            return Ok(false);
        }
        info!(%today, "habit day rolled over");
        self.commit_habits(next)?;
        Ok(true)
    }

    /// Wipe every persisted collection and fall back to seed data.
    /// If clearing fails partway, memory is reloaded from whatever is still
    /// stored before the error is returned.
    #[instrument(skip(self))]
    pub fn reset_all(&mut self) -> Result<()> {
        if let Err(err) = self.persistence.clear_all() {
            warn!(error = %format!("{err:#}"), "reset interrupted, reloading stored state");
            self.reload()?;
            return Err(err.context("failed to clear stored data"));
        }
        self.reload()?;
        info!("all data reset to defaults");
        Ok(())
    }

    fn reload(&mut self) -> Result<()> {
        self.tasks = self
            .persistence
            .load(TASKS_KEY, seed_tasks)
            .context("failed to load tasks")?;
        self.habits = self
            .persistence
            .load(HABITS_KEY, seed_habits)
            .context("failed to load habits")?;
        self.events = self
            .persistence
            .load(EVENTS_KEY, seed_events)
            .context("failed to load events")?;
        info!(
            tasks = self.tasks.len(),
            habits = self.habits.len(),
            events = self.events.len(),
            "state loaded"
        );
        Ok(())
    }

    fn commit_tasks(&mut self, next: Vec<Task>) -> Result<()> {
        self.persistence.save(TASKS_KEY, &next)?;
        self.tasks = next;
        Ok(())
    }

    fn commit_habits(&mut self, next: Vec<Habit>) -> Result<()> {
        self.persistence.save(HABITS_KEY, &next)?;
        self.habits = next;
        Ok(())
    }

    fn commit_events(&mut self, next: Vec<CalendarEvent>) -> Result<()> {
        self.persistence.save(EVENTS_KEY, &next)?;
        self.events = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::habit::FixedClock;
    use crate::model::Priority;
    use chrono::NaiveDate;

    fn memory_store() -> (Arc<MemoryStore>, PlannerStore) {
        let backend = Arc::new(MemoryStore::new());
        let store = PlannerStore::builder()
            .with_storage(backend.clone())
            .build()
            .expect("build store");
        (backend, store)
    }

    fn stored<T: serde::de::DeserializeOwned>(backend: &MemoryStore, key: &str) -> T {
        let raw = backend.get(key).unwrap().expect("key persisted");
        serde_json::from_str(&raw).unwrap()
    }

    #[test]
    fn starts_from_seed_data() {
        let (backend, store) = memory_store();
        assert!(store.tasks().is_empty());
        assert_eq!(store.habits().len(), 3);
        assert!(store.events().is_empty());
        assert!(backend.is_empty(), "loading must not write");
    }

    #[test]
    fn new_tasks_are_prepended() {
        let (backend, mut store) = memory_store();
        assert!(store.add_personal_task("T1").unwrap().is_applied());
        assert!(store.add_task("T2", TaskCategory::Work).unwrap().is_applied());

        let titles: Vec<&str> = store.tasks().iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, ["T2", "T1"]);
        for task in store.tasks() {
            assert!(!task.completed);
            assert_eq!(task.priority, Priority::Medium);
        }
        assert_ne!(store.tasks()[0].id, store.tasks()[1].id);
        assert_eq!(store.tasks()[1].category, TaskCategory::Personal);

        let persisted: Vec<Task> = stored(&backend, TASKS_KEY);
        assert_eq!(persisted, store.tasks());
    }

    #[test]
    fn blank_task_title_is_rejected_without_writing() {
        let (backend, mut store) = memory_store();
        let outcome = store.add_personal_task("   ").unwrap();
        assert!(matches!(outcome, Mutation::Rejected(_)));
        assert!(store.tasks().is_empty());
        assert!(backend.get(TASKS_KEY).unwrap().is_none());
    }

    #[test]
    fn double_toggle_restores_task() {
        let (_, mut store) = memory_store();
        store.add_personal_task("Laundry").unwrap();
        let id = store.tasks()[0].id.clone();
        store.toggle_task(&id).unwrap();
        assert!(store.tasks()[0].completed);
        assert_eq!(store.task_progress().percent(), 100.0);
        store.toggle_task(&id).unwrap();
        assert!(!store.tasks()[0].completed);
    }

    #[test]
    fn unknown_ids_are_silent_no_ops() {
        let (backend, mut store) = memory_store();
        assert_eq!(store.toggle_task("missing").unwrap(), Mutation::NotFound);
        assert_eq!(store.toggle_habit("missing").unwrap(), Mutation::NotFound);
        assert_eq!(store.remove_event("missing").unwrap(), Mutation::NotFound);
        assert!(backend.is_empty());
    }

    #[test]
    fn habit_streak_floors_at_zero() {
        let (backend, mut store) = memory_store();
        store.toggle_habit("h1").unwrap();
        assert_eq!(store.habits()[0].streak, 1);
        assert!(store.habits()[0].completed_today);
        store.toggle_habit("h1").unwrap();
        assert_eq!(store.habits()[0].streak, 0);
        assert!(!store.habits()[0].completed_today);

        let persisted: Vec<Habit> = stored(&backend, HABITS_KEY);
        assert_eq!(persisted, store.habits());
    }

    #[test]
    fn events_stay_stably_sorted_by_hour() {
        let (_, mut store) = memory_store();
        for (title, hour) in [("a", 9), ("b", 6), ("c", 23), ("d", 6)] {
            let event = store.new_event(title, hour, "work");
            store.add_event(event).unwrap();
        }
        let order: Vec<(u8, &str)> = store
            .events()
            .iter()
            .map(|e| (e.start_hour, e.title.as_str()))
            .collect();
        assert_eq!(order, [(6, "b"), (6, "d"), (9, "a"), (23, "c")]);
    }

    #[test]
    fn removed_event_never_reappears() {
        let (backend, mut store) = memory_store();
        let mut ids = Vec::new();
        for title in ["one", "two", "three"] {
            let event = store.new_event(title, 10, "work");
            ids.push(event.id.clone());
            store.add_event(event).unwrap();
        }
        assert_eq!(store.remove_event(&ids[1]).unwrap(), Mutation::Applied);
        assert!(store.events().iter().all(|e| e.id != ids[1]));
        assert_eq!(store.events_at_hour(10).len(), 2);

        let persisted: Vec<CalendarEvent> = stored(&backend, EVENTS_KEY);
        assert!(persisted.iter().all(|e| e.id != ids[1]));
    }

    #[test]
    fn out_of_range_hour_is_rejected() {
        let (_, mut store) = memory_store();
        let event = store.new_event("Night shift", 24, "work");
        assert!(matches!(
            store.add_event(event).unwrap(),
            Mutation::Rejected(_)
        ));
        assert!(store.events().is_empty());
    }

    #[test]
    fn timeline_covers_visible_hours() {
        let (_, mut store) = memory_store();
        let early = store.new_event("Too early", 3, "work");
        let gym = store.new_event("Gym", 7, "health");
        store.add_event(early).unwrap();
        store.add_event(gym).unwrap();
        let timeline = store.timeline();
        assert_eq!(timeline.len(), 18);
        assert_eq!(timeline[0].0, 6);
        assert_eq!(timeline[1].1.len(), 1);
        assert!(timeline.iter().all(|(_, events)| events.iter().all(|e| e.start_hour != 3)));
    }

    #[test]
    fn reset_restores_seed_data() {
        let (backend, mut store) = memory_store();
        store.add_personal_task("Temporary").unwrap();
        store.toggle_habit("h2").unwrap();
        let event = store.new_event("Meeting", 9, "work");
        store.add_event(event).unwrap();

        store.reset_all().unwrap();
        assert!(store.tasks().is_empty());
        assert!(store.events().is_empty());
        assert_eq!(store.habits(), seed_habits().as_slice());
        assert!(backend.is_empty());
    }

    struct StuckKeyStore {
        inner: MemoryStore,
        stuck: &'static str,
    }

    impl KeyValueStore for StuckKeyStore {
        fn get(&self, key: &str) -> Result<Option<String>> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<()> {
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> Result<()> {
            anyhow::ensure!(key != self.stuck, "`{key}` is read-only");
            self.inner.remove(key)
        }
    }

    #[test]
    fn interrupted_reset_reloads_what_is_still_stored() {
        let backend = Arc::new(StuckKeyStore {
            inner: MemoryStore::new(),
            stuck: EVENTS_KEY,
        });
        let mut store = PlannerStore::builder()
            .with_storage(backend.clone())
            .build()
            .unwrap();
        store.add_personal_task("Temporary").unwrap();
        store.toggle_habit("h1").unwrap();
        let event = store.new_event("Standup", 9, "work");
        store.add_event(event).unwrap();

        assert!(store.reset_all().is_err());
        assert!(store.tasks().is_empty());
        assert_eq!(store.habits(), seed_habits().as_slice());
        assert_eq!(store.events().len(), 1, "events were never cleared");

        store.add_personal_task("After reset").unwrap();
        let persisted: Vec<Task> = stored(&backend.inner, TASKS_KEY);
        assert_eq!(persisted.len(), 1);
        assert!(backend.inner.get(HABITS_KEY).unwrap().is_none());
    }

    #[test]
    fn dated_mode_toggles_habits_saved_without_history() {
        let backend = Arc::new(MemoryStore::new());
        let mut legacy = seed_habits();
        legacy[0].streak = 5;
        legacy[0].completed_today = true;
        backend
            .set(HABITS_KEY, &serde_json::to_string(&legacy).unwrap())
            .unwrap();

        let clock = Arc::new(FixedClock::new(NaiveDate::from_ymd_opt(2025, 11, 7).unwrap()));
        let mut store = PlannerStore::builder()
            .with_storage(backend.clone())
            .with_habit_mode(HabitMode::Dated)
            .with_clock(clock)
            .build()
            .unwrap();
        assert_eq!(store.habits()[0].streak, 5);

        store.toggle_habit("h1").unwrap();
        assert!(!store.habits()[0].completed_today);
        assert_eq!(store.habits()[0].streak, 4);

        store.toggle_habit("h1").unwrap();
        assert!(store.habits()[0].completed_today);
        assert_eq!(store.habits()[0].streak, 5);

        let persisted: Vec<Habit> = stored(&backend, HABITS_KEY);
        assert_eq!(persisted[0].completions.len(), 5);
    }

    #[test]
    fn dated_mode_rolls_over_days() {
        let clock = Arc::new(FixedClock::new(NaiveDate::from_ymd_opt(2025, 11, 7).unwrap()));
        let backend = Arc::new(MemoryStore::new());
        let mut store = PlannerStore::builder()
            .with_storage(backend.clone())
            .with_habit_mode(HabitMode::Dated)
            .with_clock(clock.clone())
            .build()
            .unwrap();

        store.toggle_habit("h1").unwrap();
        clock.advance_days(1);
        assert!(store.refresh_day().unwrap());
        assert!(!store.habits()[0].completed_today);
        assert_eq!(store.habits()[0].streak, 1);

        store.toggle_habit("h1").unwrap();
        assert_eq!(store.habits()[0].streak, 2);

        clock.advance_days(2);
        assert!(store.refresh_day().unwrap());
        assert_eq!(store.habits()[0].streak, 0);
        // Untouched seed habits have no history and are left alone.
        assert!(!store.refresh_day().unwrap());
    }

    #[test]
    fn flag_mode_ignores_day_refresh() {
        let (_, mut store) = memory_store();
        store.toggle_habit("h3").unwrap();
        assert!(!store.refresh_day().unwrap());
        assert!(store.habits()[2].completed_today);
    }

    #[test]
    fn corrupt_storage_fails_build_under_fail_policy() {
        let backend = Arc::new(MemoryStore::new());
        backend.set(EVENTS_KEY, "not json").unwrap();
        let result = PlannerStore::builder()
            .with_storage(backend.clone())
            .with_corrupt_data_policy(CorruptDataPolicy::Fail)
            .build();
        assert!(result.is_err());

        let store = PlannerStore::builder()
            .with_storage(backend)
            .build()
            .expect("fallback policy recovers");
        assert!(store.events().is_empty());
    }
}

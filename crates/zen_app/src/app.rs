use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::runtime::{Handle, Runtime};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use zen_core::{
    gemini::{GeminiClient, GeminiConfig},
    habit::HabitMode,
    model::{format_hour, TaskCategory},
    plan::{PlanError, PlanRequest},
    storage::{CorruptDataPolicy, FileStore},
    Mutation, PlannerStore,
};

use crate::planner::PlannerSession;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub(crate) data_dir: PathBuf,
    pub(crate) habit_mode: HabitMode,
    pub(crate) corrupt_data: CorruptDataPolicy,
    pub(crate) gemini: GeminiConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self::from_lookup(|name| std::env::var(name).ok()))
    }

    /// Build a configuration from any variable source. Unparseable values
    /// keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(dir) = lookup("ZENPLAN_DATA_DIR").filter(|dir| !dir.trim().is_empty()) {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(mode) = lookup("ZENPLAN_HABIT_MODE") {
            match HabitMode::parse(&mode) {
                Some(mode) => config.habit_mode = mode,
                None => debug!(%mode, "ignoring unknown habit mode"),
            }
        }
        if let Some(policy) = lookup("ZENPLAN_CORRUPT_DATA") {
            match policy.trim().to_ascii_lowercase().as_str() {
                "fallback" => config.corrupt_data = CorruptDataPolicy::FallbackToDefault,
                "fail" => config.corrupt_data = CorruptDataPolicy::Fail,
                other => debug!(policy = %other, "ignoring unknown corrupt data policy"),
            }
        }
        config.gemini.api_key = lookup("GEMINI_API_KEY").or_else(|| lookup("API_KEY"));
        if let Some(model) = lookup("ZENPLAN_MODEL").filter(|model| !model.trim().is_empty()) {
            config.gemini.model = model.trim().to_string();
        }
        if let Some(base) = lookup("ZENPLAN_API_BASE").filter(|base| !base.trim().is_empty()) {
            config.gemini.base_url = base.trim().to_string();
        }
        if let Some(secs) = lookup("ZENPLAN_TIMEOUT_SECS") {
            if let Ok(value) = secs.trim().parse::<u64>() {
                if value > 0 {
                    config.gemini.timeout = Duration::from_secs(value);
                }
            }
        }
        config
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn with_habit_mode(mut self, mode: HabitMode) -> Self {
        self.habit_mode = mode;
        self
    }

    pub fn data_dir(&self) -> &PathBuf {
        &self.data_dir
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".zenplan"),
            habit_mode: HabitMode::Flag,
            corrupt_data: CorruptDataPolicy::FallbackToDefault,
            gemini: GeminiConfig::default(),
        }
    }
}

/// The five top-level screens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tab {
    #[default]
    Today,
    Calendar,
    Habits,
    Coach,
    Settings,
}

/// User actions routed from the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    SelectTab(Tab),
    AddTask {
        title: String,
        category: Option<TaskCategory>,
    },
    ToggleTask(String),
    ToggleHabit(String),
    AddEvent {
        title: String,
        start_hour: u8,
        category: Option<String>,
    },
    RemoveEvent(String),
    ResetAll,
}

const DEFAULT_EVENT_CATEGORY: &str = "work";

pub struct AppController {
    store: PlannerStore,
    planner: PlannerSession,
    active_tab: Tab,
}

impl AppController {
    pub fn new(config: &AppConfig, runtime: Handle) -> Result<Self> {
        info!(data_dir = %config.data_dir.display(), "initializing controller");
        let storage = FileStore::open(&config.data_dir)?;
        let store = PlannerStore::builder()
            .with_storage(Arc::new(storage))
            .with_habit_mode(config.habit_mode)
            .with_corrupt_data_policy(config.corrupt_data)
            .build()
            .context("failed to load planner state")?;
        let client = GeminiClient::from_config(&config.gemini)
            .context("failed to initialize plan client")?;
        if !client.has_credential() {
            info!("no API key configured; plan requests will fail");
        }
        let planner = PlannerSession::new(Arc::new(client), config.gemini.timeout, runtime);
        Ok(Self::with_parts(store, planner))
    }

    pub fn with_parts(store: PlannerStore, planner: PlannerSession) -> Self {
        Self {
            store,
            planner,
            active_tab: Tab::default(),
        }
    }

    pub fn store(&self) -> &PlannerStore {
        &self.store
    }

    pub fn planner(&self) -> &PlannerSession {
        &self.planner
    }

    pub fn active_tab(&self) -> Tab {
        self.active_tab
    }

    pub fn dispatch(&mut self, intent: Intent) -> Result<Mutation> {
        debug!(?intent, "dispatching intent");
        match intent {
            Intent::SelectTab(tab) => {
                if self.active_tab == Tab::Coach && tab != Tab::Coach {
                    self.planner.start_over();
                }
                self.active_tab = tab;
                Ok(Mutation::Applied)
            }
            Intent::AddTask { title, category } => self
                .store
                .add_task(&title, category.unwrap_or_default()),
            Intent::ToggleTask(id) => self.store.toggle_task(&id),
            Intent::ToggleHabit(id) => self.store.toggle_habit(&id),
            Intent::AddEvent {
                title,
                start_hour,
                category,
            } => {
                let category = category.unwrap_or_else(|| DEFAULT_EVENT_CATEGORY.to_string());
                let event = self.store.new_event(&title, start_hour, &category);
                self.store.add_event(event)
            }
            Intent::RemoveEvent(id) => self.store.remove_event(&id),
            Intent::ResetAll => {
                self.store.reset_all()?;
                self.planner.start_over();
                self.active_tab = Tab::default();
                Ok(Mutation::Applied)
            }
        }
    }

    /// Ask the coach for a plan built from `brain_dump` and the current
    /// task titles.
    pub fn request_plan(&self, brain_dump: &str) -> Result<JoinHandle<()>, PlanError> {
        let titles = self.store.task_titles();
        self.planner.submit(PlanRequest::new(brain_dump, titles.as_slice()))
    }

    pub fn refresh_day(&mut self) -> Result<bool> {
        self.store.refresh_day()
    }
}

/// Plain-text rendering of the dashboard, timeline and habits.
pub fn render_summary(store: &PlannerStore) -> String {
    let mut out = String::new();
    let progress = store.task_progress();
    let _ = writeln!(
        out,
        "Today: {}/{} tasks done ({:.0}%)",
        progress.completed,
        progress.total,
        progress.percent()
    );
    for task in store.tasks() {
        let mark = if task.completed { 'x' } else { ' ' };
        let _ = writeln!(out, "  [{}] {} ({})", mark, task.title, task.category.as_str());
    }

    let _ = writeln!(out, "Schedule:");
    for (hour, events) in store.timeline() {
        for event in events {
            let _ = writeln!(out, "  {:>5}  {}", format_hour(hour), event.title);
        }
    }

    let _ = writeln!(out, "Habits:");
    for habit in store.habits() {
        let mark = if habit.completed_today { 'x' } else { ' ' };
        let _ = writeln!(out, "  [{}] {} (streak {})", mark, habit.title, habit.streak);
    }
    out
}

pub fn run(config: AppConfig) -> Result<()> {
    let runtime = Runtime::new().context("failed to start async runtime")?;
    let mut controller = AppController::new(&config, runtime.handle().clone())?;
    if controller.refresh_day()? {
        info!("habit state rolled over to today");
    }
    print!("{}", render_summary(controller.store()));
    Ok(())
}

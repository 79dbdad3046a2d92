//! Nested progress contexts with named counters.
//!
//! A [`Progress`] hands out [`Task`]s for operations that may take a while;
//! each task can carry any number of counters ("files", "bytes", ...) that
//! are cheap to increment. Rendering goes through `indicatif`, which
//! rate-limits redraws, so incrementing from hot loops is fine.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Factory for progress tasks. Clone-cheap; tasks from one `Progress` stack
/// in the terminal.
#[derive(Clone)]
pub struct Progress {
    multi: MultiProgress,
}

impl Progress {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::with_draw_target(ProgressDrawTarget::stderr()),
        }
    }

    /// A progress handle that renders nothing. Used by tests and when the
    /// output is not a terminal.
    pub fn hidden() -> Self {
        Self {
            multi: MultiProgress::with_draw_target(ProgressDrawTarget::hidden()),
        }
    }

    /// Start an operation that may take some time. The task logs itself as
    /// finished when dropped.
    pub fn task(&self, description: impl Into<String>) -> Task {
        let bar = self.multi.add(ProgressBar::new_spinner());
        bar.set_style(ProgressStyle::with_template("{msg}").expect("static template"));
        let state = Arc::new(TaskState {
            description: description.into(),
            counters: Mutex::new(Vec::new()),
        });
        bar.set_message(state.render());
        Task { bar, state }
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

struct CounterState {
    unit: String,
    total: Option<i64>,
    value: AtomicI64,
}

struct TaskState {
    description: String,
    counters: Mutex<Vec<Arc<CounterState>>>,
}

impl TaskState {
    fn render(&self) -> String {
        let mut message = format!("{}...", self.description);
        let counters = self.counters.lock().unwrap();
        for (i, counter) in counters.iter().enumerate() {
            let value = counter.value.load(Ordering::Relaxed);
            message.push_str(if i == 0 { " " } else { ", " });
            match counter.total {
                Some(total) if total > 0 => {
                    let percent = 100 * value / total;
                    message.push_str(&format!(
                        "{}/{} {} ({}%)",
                        value, total, counter.unit, percent
                    ));
                }
                _ => message.push_str(&format!("{} {}", value, counter.unit)),
            }
        }
        message
    }
}

/// A currently ongoing operation; see [`Progress::task`].
pub struct Task {
    bar: ProgressBar,
    state: Arc<TaskState>,
}

impl Task {
    /// Add a counter displayed along with the task; `unit` might be "files",
    /// "bytes", or whatever is being counted.
    pub fn counter(&self, unit: impl Into<String>) -> Counter {
        self.add_counter(unit.into(), None)
    }

    /// Like [`Task::counter`], with a known total so a percentage can be
    /// shown.
    pub fn counter_with_total(&self, unit: impl Into<String>, total: i64) -> Counter {
        self.add_counter(unit.into(), Some(total))
    }

    fn add_counter(&self, unit: String, total: Option<i64>) -> Counter {
        let counter = Arc::new(CounterState {
            unit,
            total,
            value: AtomicI64::new(0),
        });
        self.state.counters.lock().unwrap().push(counter.clone());
        Counter {
            state: counter,
            task: self.state.clone(),
            bar: self.bar.clone(),
        }
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        self.bar
            .finish_with_message(format!("{} done", self.state.render()));
    }
}

/// Increments one counter of a running [`Task`].
pub struct Counter {
    state: Arc<CounterState>,
    task: Arc<TaskState>,
    bar: ProgressBar,
}

impl Counter {
    pub fn increment(&self, diff: i64) {
        self.state.value.fetch_add(diff, Ordering::Relaxed);
        if !self.bar.is_finished() {
            self.bar.set_message(self.task.render());
        }
    }

    pub fn value(&self) -> i64 {
        self.state.value.load(Ordering::Relaxed)
    }
}

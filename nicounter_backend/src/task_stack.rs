//! Ordered collection of the tasks created by one acquisition call.
//!
//! Every task is pushed in creation order and remembered as started once started. The owner
//! calls [`TaskStack::release_all`] on every exit path, success or failure: tasks are stopped
//! (if they were started) and cleared in reverse creation order. Release keeps going after a
//! failing task so no handle is left behind, and reports the first failure.

use log::{debug, warn};

use crate::driver::DaqDriver;
use crate::error::DaqResult;

struct StackEntry<T> {
    label: String,
    task: T,
    started: bool,
}

pub struct TaskStack<D: DaqDriver> {
    entries: Vec<StackEntry<D::Task>>,
}

impl<D: DaqDriver> TaskStack<D> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Creates a task through `driver` and takes ownership of it. Returns its index.
    pub fn create(&mut self, driver: &mut D, label: &str) -> DaqResult<usize> {
        let task = driver.create_task(label)?;
        self.entries.push(StackEntry {
            label: label.to_string(),
            task,
            started: false,
        });
        Ok(self.entries.len() - 1)
    }

    /// Panics if `index` was not returned by [`TaskStack::create`] on this stack.
    pub fn task(&self, index: usize) -> &D::Task {
        &self.entries[index].task
    }

    pub fn label(&self, index: usize) -> &str {
        &self.entries[index].label
    }

    pub fn start(&mut self, driver: &mut D, index: usize) -> DaqResult<()> {
        let entry = &mut self.entries[index];
        driver.start(&entry.task)?;
        entry.started = true;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn release_all(&mut self, driver: &mut D) -> DaqResult<()> {
        let mut first_err = None;
        while let Some(entry) = self.entries.pop() {
            if entry.started {
                if let Err(e) = driver.stop(&entry.task) {
                    warn!("Failed to stop task {}: {}", entry.label, e);
                    first_err.get_or_insert(e);
                }
            }
            match driver.clear(entry.task) {
                Ok(()) => debug!("Released task {}", entry.label),
                Err(e) => {
                    warn!("Failed to clear task {}: {}", entry.label, e);
                    first_err.get_or_insert(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<D: DaqDriver> Default for TaskStack<D> {
    fn default() -> Self {
        Self::new()
    }
}

//! Cooperative, tick-driven task scheduler
//!
//! The tick interrupt calls [`TaskScheduler::tick_handler`] every 100 ms. It only
//! decrements countdowns and raises due flags. The main loop calls
//! [`TaskScheduler::dispatch_tasks`], which runs every due task to completion
//! outside of the interrupt, so flash, sensor and radio work never happens in
//! interrupt context.
//!
//! Tasks are identified by [`TaskId`] rather than by function pointer. A table
//! holds at most one live entry per identity: adding a task that is already
//! scheduled re-times the existing entry.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use heapless::Vec;
use thiserror_no_std::Error;

/// Scheduler tick rate (100 ms wake-up timer)
pub const TICKS_PER_SECOND: u32 = 10;

/// Default capacity of the task table, above the number of task identities
pub const MAX_TASKS: usize = 20;

pub const fn secs_to_ticks(secs: u32) -> u32 {
    secs.saturating_mul(TICKS_PER_SECOND)
}

pub const fn minutes_to_ticks(minutes: u32) -> u32 {
    secs_to_ticks(minutes.saturating_mul(60))
}

pub const fn hours_to_ticks(hours: u32) -> u32 {
    minutes_to_ticks(hours.saturating_mul(60))
}

/// Every task the firmware knows how to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskId {
    Advertise,
    StopAdvertising,
    FlashLed,
    Heartbeat,
    SendData,
    VibrationAnalysis,
    PerformFft,
    SaveConfig,
    DownloadData,
    DownloadFft,
    GetSessionCount,
    GetFftCount,
    EraseAll,
    EraseData,
    EraseFft,
    PowerOff,
    DataRequest,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Task table is full ({capacity} entries)")]
    TableFull { capacity: usize },
    #[error("Task {0:?} is not scheduled")]
    UnknownTask(TaskId),
}

/// Timing of one scheduled task, as seen from outside the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskTiming {
    /// Ticks left before the task is next due
    pub remaining: u32,
    /// Reload value after each run, ignored for one-shot tasks
    pub period: u32,
    pub one_shot: bool,
    pub due: bool,
}

#[derive(Debug, Clone, Copy)]
struct TaskEntry {
    id: TaskId,
    remaining: u32,
    period: u32,
    one_shot: bool,
    due: bool,
    /// Cleared once a one-shot task has become due
    armed: bool,
}

impl TaskEntry {
    fn retime(&mut self, delay: u32, period: u32, one_shot: bool) {
        self.remaining = delay;
        self.period = period;
        self.one_shot = one_shot;
        self.armed = true;
        self.due = false;
    }

    fn tick(&mut self) {
        if !self.armed {
            return;
        }

        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.due = true;
            if self.one_shot {
                self.armed = false;
            } else {
                self.remaining = self.period;
            }
        }
    }
}

/// Fixed-capacity task table shared between the tick interrupt and the main loop
///
/// All accesses go through a critical-section mutex, so a `TaskScheduler` can
/// live in a `static` and be ticked from an interrupt handler.
pub struct TaskScheduler<const N: usize = MAX_TASKS> {
    table: Mutex<CriticalSectionRawMutex, RefCell<Vec<TaskEntry, N>>>,
}

impl<const N: usize> Default for TaskScheduler<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> TaskScheduler<N> {
    /// Create an empty scheduler
    pub const fn new() -> Self {
        Self {
            table: Mutex::new(RefCell::new(Vec::new())),
        }
    }

    /// Register a task, or re-time it if it is already scheduled
    ///
    /// The task first becomes due after `delay` ticks (on the next tick when
    /// `delay` is 0), then every `period` ticks unless `one_shot` is set.
    pub fn add_task(
        &self,
        id: TaskId,
        delay: u32,
        period: u32,
        one_shot: bool,
    ) -> Result<(), SchedulerError> {
        self.table.lock(|table| {
            let mut table = table.borrow_mut();

            if let Some(entry) = table.iter_mut().find(|entry| entry.id == id) {
                entry.retime(delay, period, one_shot);
                return Ok(());
            }

            table
                .push(TaskEntry {
                    id,
                    remaining: delay,
                    period,
                    one_shot,
                    due: false,
                    armed: true,
                })
                .map_err(|_| SchedulerError::TableFull { capacity: N })
        })
    }

    /// Re-time an already scheduled task
    pub fn modify_task(
        &self,
        id: TaskId,
        delay: u32,
        period: u32,
        one_shot: bool,
    ) -> Result<(), SchedulerError> {
        self.table.lock(|table| {
            let mut table = table.borrow_mut();
            let entry = table
                .iter_mut()
                .find(|entry| entry.id == id)
                .ok_or(SchedulerError::UnknownTask(id))?;
            entry.retime(delay, period, one_shot);
            Ok(())
        })
    }

    /// Remove a task from the table. Returns `false` if it was not scheduled.
    pub fn remove_task(&self, id: TaskId) -> bool {
        self.table.lock(|table| {
            let mut table = table.borrow_mut();
            match table.iter().position(|entry| entry.id == id) {
                Some(index) => {
                    table.remove(index);
                    true
                }
                None => false,
            }
        })
    }

    /// Advance every countdown by one tick. Called from the tick interrupt.
    pub fn tick_handler(&self) {
        self.table.lock(|table| {
            for entry in table.borrow_mut().iter_mut() {
                entry.tick();
            }
        });
    }

    /// Run every due task, in table order
    ///
    /// The due tasks are collected inside one critical section. Each task is
    /// then claimed just before it runs: its due flag is cleared and a due
    /// one-shot entry is removed. A task that an earlier task removed or
    /// re-timed in the same round is skipped. Tasks run with the table
    /// unlocked, so `run` may freely add, modify or remove tasks. A tick that
    /// makes a task due again while it runs is kept for the next dispatch.
    ///
    /// Returns the number of tasks that ran.
    pub fn dispatch_tasks<F>(&self, mut run: F) -> usize
    where
        F: FnMut(TaskId),
    {
        let due: Vec<TaskId, N> = self.table.lock(|table| {
            table
                .borrow()
                .iter()
                .filter(|entry| entry.due)
                .map(|entry| entry.id)
                .collect()
        });

        let mut ran = 0;
        for &id in due.iter() {
            if self.claim(id) {
                run(id);
                ran += 1;
            }
        }
        ran
    }

    /// Clear the due flag of `id`. Returns `false` if it is no longer due.
    fn claim(&self, id: TaskId) -> bool {
        self.table.lock(|table| {
            let mut table = table.borrow_mut();
            let Some(index) = table.iter().position(|entry| entry.id == id && entry.due) else {
                return false;
            };

            table[index].due = false;
            if !table[index].armed {
                table.remove(index);
            }
            true
        })
    }

    pub fn is_scheduled(&self, id: TaskId) -> bool {
        self.timing(id).is_some()
    }

    /// Current timing of a task, if it is scheduled
    pub fn timing(&self, id: TaskId) -> Option<TaskTiming> {
        self.table.lock(|table| {
            table
                .borrow()
                .iter()
                .find(|entry| entry.id == id)
                .map(|entry| TaskTiming {
                    remaining: entry.remaining,
                    period: entry.period,
                    one_shot: entry.one_shot,
                    due: entry.due,
                })
        })
    }

    pub fn len(&self) -> usize {
        self.table.lock(|table| table.borrow().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec as StdVec;

    fn run_ticks<const N: usize>(scheduler: &TaskScheduler<N>, ticks: u32) -> StdVec<TaskId> {
        let mut ran = StdVec::new();
        for _ in 0..ticks {
            scheduler.tick_handler();
            scheduler.dispatch_tasks(|id| ran.push(id));
        }
        ran
    }

    #[test]
    fn test_tick_conversions() {
        assert_eq!(secs_to_ticks(5), 50);
        assert_eq!(minutes_to_ticks(6), 3600);
        assert_eq!(hours_to_ticks(1), 36_000);
        assert_eq!(secs_to_ticks(u32::MAX), u32::MAX, "Conversion must saturate");
    }

    #[test]
    fn test_add_same_task_twice_keeps_one_entry() {
        let scheduler: TaskScheduler<4> = TaskScheduler::new();
        scheduler.add_task(TaskId::Heartbeat, 10, 10, false).unwrap();
        scheduler.add_task(TaskId::Heartbeat, 3, 7, false).unwrap();

        assert_eq!(scheduler.len(), 1, "Re-adding a task must not duplicate it");
        let timing = scheduler.timing(TaskId::Heartbeat).unwrap();
        assert_eq!(timing.remaining, 3);
        assert_eq!(timing.period, 7);
    }

    #[test]
    fn test_table_full_is_reported() {
        let scheduler: TaskScheduler<2> = TaskScheduler::new();
        scheduler.add_task(TaskId::Heartbeat, 1, 1, false).unwrap();
        scheduler.add_task(TaskId::SendData, 1, 1, false).unwrap();

        assert_eq!(
            scheduler.add_task(TaskId::FlashLed, 1, 1, false),
            Err(SchedulerError::TableFull { capacity: 2 })
        );
        // Re-timing an existing task still works on a full table
        assert!(scheduler.add_task(TaskId::SendData, 5, 5, false).is_ok());
    }

    #[test]
    fn test_one_shot_runs_exactly_once() {
        let scheduler: TaskScheduler<4> = TaskScheduler::new();
        scheduler.add_task(TaskId::PerformFft, 3, 0, true).unwrap();

        let ran = run_ticks(&scheduler, 20);

        assert_eq!(ran, [TaskId::PerformFft]);
        assert!(
            !scheduler.is_scheduled(TaskId::PerformFft),
            "One-shot task must be removed after it ran"
        );
    }

    #[test]
    fn test_one_shot_with_zero_delay_runs_on_next_tick() {
        let scheduler: TaskScheduler<4> = TaskScheduler::new();
        scheduler.add_task(TaskId::EraseData, 0, 0, true).unwrap();

        assert_eq!(run_ticks(&scheduler, 1), [TaskId::EraseData]);
    }

    #[test]
    fn test_one_shot_due_twice_before_dispatch_runs_once() {
        let scheduler: TaskScheduler<4> = TaskScheduler::new();
        scheduler.add_task(TaskId::PowerOff, 1, 1, true).unwrap();

        for _ in 0..5 {
            scheduler.tick_handler();
        }

        let mut count = 0;
        scheduler.dispatch_tasks(|_| count += 1);
        scheduler.dispatch_tasks(|_| count += 1);
        assert_eq!(count, 1);
    }

    #[test]
    fn test_periodic_task_runs_every_period() {
        let scheduler: TaskScheduler<4> = TaskScheduler::new();
        scheduler.add_task(TaskId::FlashLed, 2, 5, false).unwrap();

        let mut runs_at = StdVec::new();
        for tick in 1..=17 {
            scheduler.tick_handler();
            scheduler.dispatch_tasks(|_| runs_at.push(tick));
        }

        assert_eq!(runs_at, [2, 7, 12, 17]);
        assert!(scheduler.is_scheduled(TaskId::FlashLed));
    }

    #[test]
    fn test_periodic_task_runs_after_each_reload() {
        // A 10-tick period fires 3 times in 30 ticks when started with delay 10
        let scheduler: TaskScheduler<4> = TaskScheduler::new();
        scheduler.add_task(TaskId::Heartbeat, 10, 10, false).unwrap();

        assert_eq!(run_ticks(&scheduler, 30).len(), 3);
    }

    #[test]
    fn test_dispatch_without_due_task_is_noop() {
        let scheduler: TaskScheduler<4> = TaskScheduler::new();
        scheduler.add_task(TaskId::Heartbeat, 10, 10, false).unwrap();

        let mut ran = false;
        assert_eq!(scheduler.dispatch_tasks(|_| ran = true), 0);
        assert!(!ran);
        assert_eq!(scheduler.timing(TaskId::Heartbeat).unwrap().remaining, 10);
    }

    #[test]
    fn test_task_can_reschedule_itself_while_running() {
        let scheduler: TaskScheduler<4> = TaskScheduler::new();
        scheduler.add_task(TaskId::Advertise, 1, 0, true).unwrap();

        scheduler.tick_handler();
        scheduler.dispatch_tasks(|id| {
            scheduler.add_task(TaskId::StopAdvertising, 5, 0, true).unwrap();
            scheduler.add_task(id, 50, 0, true).unwrap();
        });

        assert!(scheduler.is_scheduled(TaskId::StopAdvertising));
        assert_eq!(scheduler.timing(TaskId::Advertise).unwrap().remaining, 50);
    }

    #[test]
    fn test_modify_unknown_task_fails() {
        let scheduler: TaskScheduler<4> = TaskScheduler::new();
        assert_eq!(
            scheduler.modify_task(TaskId::SendData, 1, 1, false),
            Err(SchedulerError::UnknownTask(TaskId::SendData))
        );
    }

    #[test]
    fn test_remove_task() {
        let scheduler: TaskScheduler<4> = TaskScheduler::new();
        scheduler.add_task(TaskId::PerformFft, 1, 1, false).unwrap();

        assert!(scheduler.remove_task(TaskId::PerformFft));
        assert!(!scheduler.remove_task(TaskId::PerformFft));
        assert!(run_ticks(&scheduler, 5).is_empty());
    }

    #[test]
    fn test_static_scheduler() {
        static SCHEDULER: TaskScheduler = TaskScheduler::new();
        SCHEDULER.add_task(TaskId::FlashLed, 1, 1, false).unwrap();
        SCHEDULER.tick_handler();
        assert_eq!(SCHEDULER.dispatch_tasks(|_| {}), 1);
    }

    #[test]
    fn test_readded_due_one_shot_runs_once() {
        let scheduler: TaskScheduler<4> = TaskScheduler::new();
        scheduler.add_task(TaskId::GetSessionCount, 0, 0, true).unwrap();
        scheduler.tick_handler();
        scheduler.add_task(TaskId::GetSessionCount, 0, 0, true).unwrap();

        let mut count = 0;
        for _ in 0..5 {
            count += scheduler.dispatch_tasks(|_| {});
            scheduler.tick_handler();
        }
        assert_eq!(count, 1, "Re-adding a due one-shot replaces its timing");
    }

    #[test]
    fn test_modify_clears_pending_run() {
        let scheduler: TaskScheduler<4> = TaskScheduler::new();
        scheduler.add_task(TaskId::SendData, 1, 1000, false).unwrap();
        scheduler.tick_handler();
        assert!(scheduler.timing(TaskId::SendData).unwrap().due);

        scheduler.modify_task(TaskId::SendData, 500, 500, false).unwrap();
        assert_eq!(scheduler.dispatch_tasks(|_| {}), 0);
        assert_eq!(run_ticks(&scheduler, 499).len(), 0);
        assert_eq!(run_ticks(&scheduler, 1), [TaskId::SendData]);
    }

    #[test]
    fn test_task_removed_by_earlier_task_does_not_run() {
        let scheduler: TaskScheduler<4> = TaskScheduler::new();
        scheduler.add_task(TaskId::SaveConfig, 1, 0, true).unwrap();
        scheduler.add_task(TaskId::PerformFft, 1, 10, false).unwrap();
        scheduler.tick_handler();

        let mut ran = StdVec::new();
        let count = scheduler.dispatch_tasks(|id| {
            if id == TaskId::SaveConfig {
                scheduler.remove_task(TaskId::PerformFft);
            }
            ran.push(id);
        });

        assert_eq!(ran, [TaskId::SaveConfig]);
        assert_eq!(count, 1);
        assert!(scheduler.is_empty());
    }
}

//! Scheduler
//!
//! A periodic tick that fires due schedules through the coordinator.
//!
//! Each tick reads the local wall-clock minute and evaluates it at most
//! once: ticks landing in a minute that was already evaluated (or earlier,
//! after the clock moved backwards) do nothing. Only the current minute is
//! evaluated; minutes missed while the process was down are not replayed.

pub mod rule;

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use log::{debug, error, info};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::EngineError;
use crate::execution::Coordinator;
use crate::model::{Id, JobSchedule};

pub use rule::matches;

/// Evaluates schedules once per wall-clock minute.
pub struct Scheduler {
    coordinator: Coordinator,
    last_evaluated: Mutex<Option<NaiveDateTime>>,
}

impl Scheduler {
    pub fn new(coordinator: Coordinator) -> Self {
        Self {
            coordinator,
            last_evaluated: Mutex::new(None),
        }
    }

    /// Evaluates the current local minute.
    pub async fn tick(&self) -> Vec<Id> {
        self.evaluate(rule::truncate_to_minute(Local::now().naive_local()))
            .await
    }

    /// Fires every active schedule of a schedulable job that matches `minute`.
    ///
    /// A failure for one schedule is logged and does not affect the others.
    ///
    /// # Returns
    ///
    /// Ids of the executions created, empty if `minute` was already evaluated.
    pub async fn evaluate(&self, minute: NaiveDateTime) -> Vec<Id> {
        let minute = rule::truncate_to_minute(minute);
        if !self.claim(minute) {
            return Vec::new();
        }

        let store = self.coordinator.store();
        let schedules = match store.schedules() {
            Ok(schedules) => schedules,
            Err(e) => {
                error!("Could not load schedules for {}: {}", minute, e);
                return Vec::new();
            }
        };

        let mut fired = Vec::new();
        for schedule in schedules.iter().filter(|s| s.active) {
            match self.evaluate_schedule(schedule, minute).await {
                Ok(Some(execution_id)) => fired.push(execution_id),
                Ok(None) => {}
                Err(e) => error!("{}", e),
            }
        }

        if !fired.is_empty() {
            info!("{} schedule(s) fired at {}", fired.len(), minute);
        }
        fired
    }

    /// Runs the tick loop on its own task until the handle is stopped.
    ///
    /// `interval` must not exceed [`MAX_TICK_SECONDS`](crate::settings::MAX_TICK_SECONDS),
    /// or a late tick can step over a whole minute.
    pub fn spawn(self, interval: Duration) -> SchedulerHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            info!("Scheduler loop started with interval {:?}", interval);
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.tick().await;
                    }
                    _ = &mut stop_rx => break,
                }
            }
            info!("Scheduler loop stopped");
        });

        SchedulerHandle {
            stop: Some(stop_tx),
            task,
        }
    }

    /// Records `minute` as evaluated; false if it is not after the last one.
    fn claim(&self, minute: NaiveDateTime) -> bool {
        let mut last = self
            .last_evaluated
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match *last {
            Some(previous) if minute <= previous => {
                debug!("Minute {} already evaluated (last: {})", minute, previous);
                false
            }
            _ => {
                *last = Some(minute);
                true
            }
        }
    }

    async fn evaluate_schedule(
        &self,
        schedule: &JobSchedule,
        minute: NaiveDateTime,
    ) -> Result<Option<Id>, EngineError> {
        let tick_error = |reason: String| EngineError::SchedulingTick {
            schedule_id: schedule.id,
            reason,
        };

        let job = self
            .coordinator
            .store()
            .job(schedule.job_id)
            .map_err(|e| tick_error(e.to_string()))?;
        if !job.is_schedulable() {
            return Ok(None);
        }

        if !rule::matches(schedule, minute).map_err(tick_error)? {
            return Ok(None);
        }

        debug!("Schedule {} of job '{}' is due", schedule.id, job.name);
        let execution_id = self
            .coordinator
            .trigger_scheduled(job.id, schedule.id)
            .await
            .map_err(|e| tick_error(e.to_string()))?;
        Ok(Some(execution_id))
    }
}

/// Controls a spawned scheduler loop.
pub struct SchedulerHandle {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stops the loop and waits for it to exit.
    ///
    /// Executions already triggered keep running; drain the coordinator to wait for them.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(e) = self.task.await {
            error!("Scheduler task ended abnormally: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::{NaiveDate, Weekday};

    use crate::model::{Job, WeekDays};
    use crate::settings::Settings;
    use crate::store::{MemoryStore, Store};
    use crate::testing::{labelled_job, Probe};
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        store: Arc<MemoryStore>,
        coordinator: Coordinator,
        scheduler: Scheduler,
        _work_dir: TempDir,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let work_dir = tempdir().unwrap();
        let settings = Settings {
            worker_threads: 2,
            work_dir: work_dir.path().to_path_buf(),
            ..Settings::default()
        };
        let coordinator = Coordinator::new(store.clone(), Probe::new().registry(), &settings);
        Fixture {
            store,
            scheduler: Scheduler::new(coordinator.clone()),
            coordinator,
            _work_dir: work_dir,
        }
    }

    /// 2024-01-01 is a Monday.
    fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    fn monday_nine(store: &MemoryStore, job: &Job) -> JobSchedule {
        store
            .insert_schedule(JobSchedule::weekly(
                job.id,
                WeekDays::of(&[Weekday::Mon]),
                9,
                0,
            ))
            .unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_fires_once_per_minute() {
        let f = fixture();
        let job = labelled_job(f.store.as_ref(), "weekly", &["a"]);
        let schedule = monday_nine(&f.store, &job);

        let fired = f.scheduler.evaluate(at(1, 9, 0)).await;
        assert_eq!(fired.len(), 1);
        assert!(f.scheduler.evaluate(at(1, 9, 0)).await.is_empty());
        assert!(f
            .scheduler
            .evaluate(at(1, 9, 0) + chrono::Duration::seconds(30))
            .await
            .is_empty());
        assert!(f.scheduler.evaluate(at(1, 9, 1)).await.is_empty());

        f.coordinator.drain().await;
        let execution = f.store.execution(fired[0]).unwrap();
        assert_eq!(execution.trigger_schedule_id, Some(schedule.id));
        assert_eq!(f.store.executions_for_job(job.id).unwrap().len(), 1);

        assert_eq!(f.scheduler.evaluate(at(8, 9, 0)).await.len(), 1);
        f.coordinator.drain().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_clock_moving_backwards_does_not_refire() {
        let f = fixture();
        let job = labelled_job(f.store.as_ref(), "weekly", &["a"]);
        monday_nine(&f.store, &job);

        assert_eq!(f.scheduler.evaluate(at(1, 9, 0)).await.len(), 1);
        assert!(f.scheduler.evaluate(at(1, 8, 59)).await.is_empty());
        assert!(f.scheduler.evaluate(at(1, 9, 0)).await.is_empty());
        f.coordinator.drain().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_skips_unschedulable_jobs_and_inactive_schedules() {
        let f = fixture();

        let inactive_job = f.store.insert_job(Job::new("inactive").inactive()).unwrap();
        monday_nine(&f.store, &inactive_job);

        let mut deleted_job = f.store.insert_job(Job::new("deleted")).unwrap();
        monday_nine(&f.store, &deleted_job);
        deleted_job.deleted = true;
        f.store.update_job(&deleted_job).unwrap();

        let live = labelled_job(f.store.as_ref(), "live", &["a"]);
        f.store
            .insert_schedule(
                JobSchedule::weekly(live.id, WeekDays::every_day(), 9, 0).inactive(),
            )
            .unwrap();

        assert!(f.scheduler.evaluate(at(1, 9, 0)).await.is_empty());
        assert!(f.store.executions_for_job(inactive_job.id).unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_one_bad_schedule_does_not_block_others() {
        let f = fixture();
        let job = labelled_job(f.store.as_ref(), "mixed", &["a"]);
        f.store
            .insert_schedule(JobSchedule::cron(job.id, "not a cron at all"))
            .unwrap();
        f.store
            .insert_schedule(JobSchedule::cron(job.id, "0 9 * * *"))
            .unwrap();

        assert_eq!(f.scheduler.evaluate(at(3, 9, 0)).await.len(), 1);
        f.coordinator.drain().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_spawned_loop_stops() {
        let f = fixture();
        let handle = f.scheduler.spawn(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        tokio::time::timeout(Duration::from_secs(1), handle.stop())
            .await
            .unwrap();
    }
}

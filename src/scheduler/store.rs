use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;

use crate::types::Schedule;

/// Persistence of schedule definitions.
pub trait ScheduleStore {
    /// Every schedule, in creation order.
    fn load(&self) -> Result<Vec<Schedule>>;
    fn get(&self, schedule_id: &str) -> Result<Option<Schedule>>;
    /// Inserts or replaces by id.
    fn save(&self, schedule: &Schedule) -> Result<()>;
    fn delete(&self, schedule_id: &str) -> Result<bool>;
}

pub type ScheduleRepository = Arc<dyn ScheduleStore + Send + Sync>;

#[derive(Debug, Default)]
pub struct InMemoryScheduleStore {
    schedules: Mutex<Vec<Schedule>>,
}

impl InMemoryScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schedules(schedules: Vec<Schedule>) -> Self {
        Self {
            schedules: Mutex::new(schedules),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Schedule>> {
        self.schedules.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ScheduleStore for InMemoryScheduleStore {
    fn load(&self) -> Result<Vec<Schedule>> {
        Ok(self.lock().clone())
    }

    fn get(&self, schedule_id: &str) -> Result<Option<Schedule>> {
        Ok(self
            .lock()
            .iter()
            .find(|schedule| schedule.id == schedule_id)
            .cloned())
    }

    fn save(&self, schedule: &Schedule) -> Result<()> {
        let mut schedules = self.lock();
        match schedules.iter_mut().find(|stored| stored.id == schedule.id) {
            Some(stored) => *stored = schedule.clone(),
            None => schedules.push(schedule.clone()),
        }
        Ok(())
    }

    fn delete(&self, schedule_id: &str) -> Result<bool> {
        let mut schedules = self.lock();
        let before = schedules.len();
        schedules.retain(|schedule| schedule.id != schedule_id);
        Ok(schedules.len() != before)
    }
}

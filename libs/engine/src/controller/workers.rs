//! Controller-side worker table: state machine and heartbeat accounting.

use parking_lot::Mutex;
use skein_types::{ProcessId, TaskId, WorkerInfo, WorkerStatus};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, warn};

#[derive(Debug)]
struct WorkerSlot {
    info: WorkerInfo,
    last_heartbeat: Instant,
    missed: u32,
    /// Number of actors homed on this worker; placement load.
    actor_load: u32,
}

/// Tracks every worker in the group. Only the controller mutates this, and
/// only in response to worker messages or heartbeat expiry.
#[derive(Debug)]
pub struct WorkerTable {
    slots: Mutex<HashMap<ProcessId, WorkerSlot>>,
}

impl WorkerTable {
    /// Ranks `1..group_size` are workers; rank 0 is the controller itself.
    pub fn new(group_size: u32) -> Self {
        let now = Instant::now();
        let slots = (1..group_size)
            .map(|rank| {
                let rank = ProcessId(rank);
                (
                    rank,
                    WorkerSlot {
                        info: WorkerInfo::new(rank),
                        last_heartbeat: now,
                        missed: 0,
                        actor_load: 0,
                    },
                )
            })
            .collect();
        Self {
            slots: Mutex::new(slots),
        }
    }

    pub fn record_heartbeat(&self, rank: ProcessId) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(&rank) {
            slot.last_heartbeat = Instant::now();
            slot.missed = 0;
        }
    }

    /// Atomically claim the lowest-ranked idle worker for `task`,
    /// transitioning it Idle → Busy. Concurrent claimers can never assign
    /// the same worker twice.
    pub fn claim_first_idle(&self, task: TaskId) -> Option<ProcessId> {
        let mut slots = self.slots.lock();
        let rank = slots
            .values()
            .filter(|slot| slot.info.status == WorkerStatus::Idle)
            .map(|slot| slot.info.process_id)
            .min()?;
        let slot = slots.get_mut(&rank)?;
        slot.info.status = WorkerStatus::Busy;
        slot.info.current_task_id = Some(task);
        Some(rank)
    }

    /// Busy → Idle on completion. Dead workers stay dead.
    pub fn mark_idle(&self, rank: ProcessId) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(&rank) {
            if slot.info.status == WorkerStatus::Busy {
                slot.info.status = WorkerStatus::Idle;
                slot.info.current_task_id = None;
            }
        }
    }

    /// Returns `true` if the worker transitioned to dead now.
    pub fn mark_dead(&self, rank: ProcessId) -> bool {
        let mut slots = self.slots.lock();
        match slots.get_mut(&rank) {
            Some(slot) if slot.info.status != WorkerStatus::Dead => {
                warn!(worker = %rank, "worker marked dead");
                slot.info.status = WorkerStatus::Dead;
                slot.info.current_task_id = None;
                true
            }
            _ => false,
        }
    }

    pub fn is_dead(&self, rank: ProcessId) -> bool {
        self.slots
            .lock()
            .get(&rank)
            .map(|slot| slot.info.status == WorkerStatus::Dead)
            .unwrap_or(true)
    }

    /// Advance heartbeat accounting by one interval; returns workers that
    /// just crossed the miss limit.
    pub fn tick(&self, miss_limit: u32) -> Vec<ProcessId> {
        let mut newly_dead = Vec::new();
        let mut slots = self.slots.lock();
        for (rank, slot) in slots.iter_mut() {
            if slot.info.status == WorkerStatus::Dead {
                continue;
            }
            slot.missed += 1;
            if slot.missed > miss_limit {
                warn!(worker = %rank, missed = slot.missed, "heartbeat limit exceeded");
                slot.info.status = WorkerStatus::Dead;
                slot.info.current_task_id = None;
                newly_dead.push(*rank);
            }
        }
        newly_dead
    }

    /// Placement for a new actor: least-loaded live worker, idle preferred,
    /// ties broken by lowest rank. Irrevocable once chosen.
    pub fn place_actor(&self) -> Option<ProcessId> {
        let mut slots = self.slots.lock();
        let chosen = slots
            .values()
            .filter(|slot| slot.info.status != WorkerStatus::Dead)
            .min_by_key(|slot| {
                let busy_penalty = u32::from(slot.info.status == WorkerStatus::Busy);
                (slot.actor_load, busy_penalty, slot.info.process_id)
            })
            .map(|slot| slot.info.process_id)?;
        if let Some(slot) = slots.get_mut(&chosen) {
            slot.actor_load += 1;
        }
        debug!(worker = %chosen, "actor placed");
        Some(chosen)
    }

    pub fn actor_torn_down(&self, rank: ProcessId) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(&rank) {
            slot.actor_load = slot.actor_load.saturating_sub(1);
        }
    }

    /// Snapshot for cluster introspection.
    pub fn snapshot(&self) -> Vec<WorkerInfo> {
        let slots = self.slots.lock();
        let mut infos: Vec<_> = slots.values().map(|slot| slot.info.clone()).collect();
        infos.sort_by_key(|info| info.process_id);
        infos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_prefers_lowest_rank_and_never_double_assigns() {
        let table = WorkerTable::new(3);
        let task = |seq| TaskId::new(ProcessId(0), seq);
        assert_eq!(table.claim_first_idle(task(0)), Some(ProcessId(1)));
        assert_eq!(table.claim_first_idle(task(1)), Some(ProcessId(2)));
        assert_eq!(table.claim_first_idle(task(2)), None);

        table.mark_idle(ProcessId(1));
        assert_eq!(table.claim_first_idle(task(3)), Some(ProcessId(1)));
    }

    #[test]
    fn heartbeat_expiry_marks_dead_once() {
        let table = WorkerTable::new(2);
        assert!(table.tick(2).is_empty());
        assert!(table.tick(2).is_empty());
        let dead = table.tick(2);
        assert_eq!(dead, vec![ProcessId(1)]);
        assert!(table.tick(2).is_empty());
        assert!(table.is_dead(ProcessId(1)));
    }

    #[test]
    fn heartbeat_resets_miss_counter() {
        let table = WorkerTable::new(2);
        table.tick(2);
        table.tick(2);
        table.record_heartbeat(ProcessId(1));
        assert!(table.tick(2).is_empty());
    }

    #[test]
    fn placement_is_least_loaded_with_rank_ties() {
        let table = WorkerTable::new(4);
        assert_eq!(table.place_actor(), Some(ProcessId(1)));
        assert_eq!(table.place_actor(), Some(ProcessId(2)));
        assert_eq!(table.place_actor(), Some(ProcessId(3)));
        // All loads equal again; lowest rank wins the tie.
        assert_eq!(table.place_actor(), Some(ProcessId(1)));
    }

    #[test]
    fn dead_workers_are_skipped_for_placement() {
        let table = WorkerTable::new(3);
        table.mark_dead(ProcessId(1));
        assert_eq!(table.place_actor(), Some(ProcessId(2)));
        table.mark_dead(ProcessId(2));
        assert_eq!(table.place_actor(), None);
    }
}

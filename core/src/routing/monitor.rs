use crate::{tasks::GroupTask, GroupLogger};
#[allow(unused_imports)]
use slog::{debug, trace, warn};
use std::{
    sync::{Condvar, Mutex, MutexGuard},
    time::Duration,
};

#[derive(Clone, Copy, Debug, Default)]
struct SlotLoad {
    busy: usize,
    dispatched: u64,
    completed: u64,
    service_time: Duration,
}

impl SlotLoad {
    fn mean_service_time(&self) -> Option<Duration> {
        if self.completed == 0 {
            None
        } else {
            Some(self.service_time / (self.completed as u32).max(1))
        }
    }
}

/// Tracks which worker slots are busy and hands out free ones on demand
///
/// A monitor is created per dispatch in the monitored modes (see
/// [is_monitored](crate::routing::DispatchMode::is_monitored)).
/// Buffered tasks report when their slot becomes busy and free again,
/// while dynamically reassignable tasks ask for a slot with [get_worker](DispatchMonitor::get_worker)
/// right before they run.
///
/// Among the free slots, the one with the lowest mean service time is preferred,
/// with slots that have never completed a task going first.
/// This copes with latency differences between members, but not with differences
/// in the size of tasks.
#[derive(Debug)]
pub struct DispatchMonitor {
    id: usize,
    slots: Mutex<Vec<SlotLoad>>,
    freed: Condvar,
    logger: GroupLogger,
}

impl DispatchMonitor {
    /// Create a monitor for `worker_count` slots, labelled with the dispatch number `id`
    pub fn new(id: usize, worker_count: usize, logger: GroupLogger) -> Self {
        DispatchMonitor {
            id,
            slots: Mutex::new(vec![SlotLoad::default(); worker_count]),
            freed: Condvar::new(),
            logger,
        }
    }

    /// The dispatch number this monitor belongs to
    pub fn id(&self) -> usize {
        self.id
    }

    /// The number of slots this monitor tracks
    pub fn worker_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<SlotLoad>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wait until some slot is free, mark it busy, and return it
    ///
    /// Returns `None` only if the monitor tracks no slots at all.
    /// Every returned slot must eventually be handed back via [release](DispatchMonitor::release).
    pub fn get_worker(&self) -> Option<usize> {
        let mut slots = self.lock();
        if slots.is_empty() {
            return None;
        }
        loop {
            let candidate = slots
                .iter()
                .enumerate()
                .filter(|(_, load)| load.busy == 0)
                .min_by_key(|(index, load)| (load.mean_service_time(), *index))
                .map(|(index, _)| index);
            if let Some(slot) = candidate {
                slots[slot].busy += 1;
                trace!(self.logger, "Handing out free slot {}", slot; "monitor" => self.id);
                return Some(slot);
            }
            slots = self.freed.wait(slots).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Mark `slot` busy on behalf of a task that was placed there statically
    pub fn occupy(&self, slot: usize) {
        let mut slots = self.lock();
        match slots.get_mut(slot) {
            Some(load) => load.busy += 1,
            None => warn!(
                self.logger,
                "Ignoring occupation of unknown slot {}",
                slot;
                "monitor" => self.id
            ),
        }
    }

    /// Record that `task` has been dispatched to its current target slot
    pub fn dispatched_task(&self, task: &dyn GroupTask) {
        let slot = task.target_slot();
        let mut slots = self.lock();
        if let Some(load) = slots.get_mut(slot) {
            load.dispatched += 1;
            trace!(
                self.logger,
                "Task for result position {} dispatched to slot {}",
                task.result_position(),
                slot;
                "monitor" => self.id
            );
        } else {
            warn!(self.logger, "Task dispatched to unknown slot {}", slot; "monitor" => self.id);
        }
    }

    /// Hand `slot` back after a task spent `elapsed` on it
    pub fn release(&self, slot: usize, elapsed: Duration) {
        let mut slots = self.lock();
        match slots.get_mut(slot) {
            Some(load) if load.busy > 0 => {
                load.busy -= 1;
                load.completed += 1;
                load.service_time += elapsed;
            }
            _ => {
                warn!(
                    self.logger,
                    "Ignoring release of slot {} that is not busy",
                    slot;
                    "monitor" => self.id
                );
                return;
            }
        }
        drop(slots);
        self.freed.notify_all();
    }

    /// The slots that currently have at least one task running
    pub fn busy_slots(&self) -> Vec<usize> {
        self.lock()
            .iter()
            .enumerate()
            .filter(|(_, load)| load.busy > 0)
            .map(|(index, _)| index)
            .collect()
    }

    /// How many tasks have been dispatched to `slot`
    pub fn dispatched(&self, slot: usize) -> u64 {
        self.lock().get(slot).map(|load| load.dispatched).unwrap_or(0)
    }

    /// How many tasks have completed on `slot`
    pub fn completed(&self, slot: usize) -> u64 {
        self.lock().get(slot).map(|load| load.completed).unwrap_or(0)
    }

    /// The mean time tasks took on `slot`, if any have completed there
    pub fn mean_service_time(&self, slot: usize) -> Option<Duration> {
        self.lock().get(slot).and_then(SlotLoad::mean_service_time)
    }
}

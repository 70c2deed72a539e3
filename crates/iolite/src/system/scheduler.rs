use crate::system::System;
use r3000::Cycles;
use std::collections::VecDeque;

pub struct ScheduledEvent {
    pub cycle: Cycles,
    pub handler: fn(&mut System),
}

/// The event queue of the IOP core, keyed by the absolute cycle at which each event is due.
///
/// The elapsed-cycle counter doubles as the time base every peripheral anchors against.
pub struct Scheduler {
    elapsed: Cycles,
    scheduled: VecDeque<ScheduledEvent>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("elapsed", &self.elapsed)
            .field("scheduled", &self.scheduled.len())
            .finish()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self {
            elapsed: Cycles(0),
            scheduled: VecDeque::with_capacity(16),
        }
    }
}

impl Scheduler {
    #[inline(always)]
    pub fn schedule(&mut self, after: Cycles, handler: fn(&mut System)) {
        let cycle = self.elapsed + after;
        let index = self.scheduled.partition_point(|e| e.cycle <= cycle);
        self.scheduled
            .insert(index, ScheduledEvent { cycle, handler });
    }

    #[inline(always)]
    pub fn schedule_now(&mut self, handler: fn(&mut System)) {
        self.schedule(Cycles(0), handler)
    }

    #[inline(always)]
    pub fn cancel(&mut self, handler: fn(&mut System)) {
        self.scheduled
            .retain(|x| !std::ptr::fn_addr_eq(x.handler, handler));
    }

    pub fn is_scheduled(&self, handler: fn(&mut System)) -> bool {
        self.scheduled
            .iter()
            .any(|x| std::ptr::fn_addr_eq(x.handler, handler))
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.scheduled.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline(always)]
    pub fn advance(&mut self, count: Cycles) {
        self.elapsed += count;
    }

    #[inline(always)]
    pub fn until_next(&self) -> Option<Cycles> {
        self.scheduled
            .front()
            .map(|e| Cycles(e.cycle.0.saturating_sub(self.elapsed.0)))
    }

    #[inline(always)]
    pub fn pop(&mut self) -> Option<fn(&mut System)> {
        self.scheduled
            .pop_front_if(|e| e.cycle <= self.elapsed)
            .map(|e| e.handler)
    }

    /// How many IOP cycles have elapsed.
    #[inline(always)]
    pub fn elapsed(&self) -> Cycles {
        self.elapsed
    }
}

//! Virtual time for deterministic runs.
//!
//! Time only moves when `advance_by` is called; sleeping futures whose
//! deadline has passed are woken so the executor polls them again.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

#[derive(Debug, Clone, Copy)]
struct TimerEntry {
    fire_at_ms: u64,
    timer: u64,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at_ms == other.fire_at_ms && self.timer == other.timer
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap: earliest deadline first, then creation order
        other
            .fire_at_ms
            .cmp(&self.fire_at_ms)
            .then_with(|| other.timer.cmp(&self.timer))
    }
}

#[derive(Default)]
struct ClockState {
    current_time_ms: u64,
    next_timer: u64,
    pending_timers: BinaryHeap<TimerEntry>,
    wakers: HashMap<u64, Waker>,
}

#[derive(Clone, Default)]
pub struct VirtualClock {
    state: Rc<RefCell<ClockState>>,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now_ms(&self) -> u64 {
        self.state.borrow().current_time_ms
    }

    pub fn sleep(&self, ms: u64) -> Sleep {
        let mut state = self.state.borrow_mut();
        let timer = state.next_timer;
        state.next_timer += 1;
        let fire_at_ms = state.current_time_ms + ms;
        state.pending_timers.push(TimerEntry { fire_at_ms, timer });
        Sleep {
            clock: self.clone(),
            fire_at_ms,
            timer,
        }
    }

    /// Moves time forward by `ms`, waking every sleeper due by then.
    ///
    /// Returns how many timers fired.
    pub fn advance_by(&self, ms: u64) -> usize {
        let wakers = {
            let mut state = self.state.borrow_mut();
            let target_time = state.current_time_ms + ms;
            let mut wakers = Vec::new();
            while let Some(entry) = state.pending_timers.peek().copied() {
                if entry.fire_at_ms > target_time {
                    break;
                }
                state.pending_timers.pop();
                if let Some(waker) = state.wakers.remove(&entry.timer) {
                    wakers.push(waker);
                }
            }
            state.current_time_ms = target_time;
            wakers
        };
        let fired = wakers.len();
        wakers.into_iter().for_each(Waker::wake);
        fired
    }

    pub fn has_pending_timers(&self) -> bool {
        !self.state.borrow().pending_timers.is_empty()
    }

    pub fn time_to_next_timer(&self) -> Option<u64> {
        let state = self.state.borrow();
        state
            .pending_timers
            .peek()
            .map(|entry| entry.fire_at_ms.saturating_sub(state.current_time_ms))
    }
}

pub struct Sleep {
    clock: VirtualClock,
    fire_at_ms: u64,
    timer: u64,
}

impl Future for Sleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let mut state = self.clock.state.borrow_mut();
        if state.current_time_ms >= self.fire_at_ms {
            state.wakers.remove(&self.timer);
            return Poll::Ready(());
        }
        state.wakers.insert(self.timer, cx.waker().clone());
        Poll::Pending
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        let mut state = self.clock.state.borrow_mut();
        state.wakers.remove(&self.timer);
        state.pending_timers.retain(|entry| entry.timer != self.timer);
    }
}

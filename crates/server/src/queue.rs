//! Blocking FIFO queue shared between producers and one worker.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::Duration;

/// Outcome of [`BlockingQueue::pop_timeout`].
#[derive(Debug, PartialEq, Eq)]
pub enum Pop<T> {
    Item(T),
    Timeout,
    Closed,
}

struct State<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Unbounded FIFO with a suspend-until-available pop.
///
/// Any number of threads may push; the consumer side is meant for a single
/// worker. Closing the queue wakes the consumer, which keeps receiving the
/// remaining items and then sees the end of the stream.
pub struct BlockingQueue<T> {
    state: Mutex<State<T>>,
    available: Condvar,
}

impl<T> BlockingQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                items: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Append an item. Never blocks.
    ///
    /// Returns `false` and discards the item if the queue is closed.
    pub fn push(&self, item: T) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        state.items.push_back(item);
        drop(state);
        self.available.notify_one();
        true
    }

    /// Wait for the next item.
    ///
    /// Returns `None` only once the queue is closed and fully drained.
    pub fn blocking_pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.closed {
                return None;
            }
            self.available.wait(&mut state);
        }
    }

    /// Like [`blocking_pop`](Self::blocking_pop) but gives up after `timeout`.
    pub fn pop_timeout(&self, timeout: Duration) -> Pop<T> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Pop::Item(item);
            }
            if state.closed {
                return Pop::Closed;
            }
            if self.available.wait_for(&mut state, timeout).timed_out() {
                return match state.items.pop_front() {
                    Some(item) => Pop::Item(item),
                    None if state.closed => Pop::Closed,
                    None => Pop::Timeout,
                };
            }
        }
    }

    /// Stop accepting items. Pending items remain poppable.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.available.notify_all();
    }

    /// Close and discard pending items, returning how many were dropped.
    pub fn abort(&self) -> usize {
        let mut state = self.state.lock();
        state.closed = true;
        let dropped = state.items.len();
        state.items.clear();
        drop(state);
        self.available.notify_all();
        dropped
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

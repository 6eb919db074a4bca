use std::cmp::min;

use parking_lot::{Condvar, Mutex};

/// Marches over `0..end_pos` in steps of `interval`, wrapping back to 0 at the end so that
/// the first chunk of the next repetition follows the last chunk of the current one.
///
/// ```
/// use expctrl_backend::utils::StreamCounter;
///
/// let mut counter = StreamCounter::new(25, 10);
/// assert_eq!(counter.tick_next(), (0, 10));
/// assert_eq!(counter.tick_next(), (10, 20));
/// assert_eq!(counter.tick_next(), (20, 25));
/// assert_eq!(counter.tick_next(), (0, 10));
/// ```
#[derive(Debug, Clone)]
pub struct StreamCounter {
    pos: usize,
    end_pos: usize,
    interval: usize,
}

impl StreamCounter {
    pub fn new(end_pos: usize, interval: usize) -> Self {
        Self {
            pos: 0,
            end_pos,
            interval,
        }
    }

    pub fn next_pos(&self) -> usize {
        min(self.pos + self.interval, self.end_pos)
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn end_pos(&self) -> usize {
        self.end_pos
    }

    pub fn tick_next(&mut self) -> (usize, usize) {
        let result = (self.pos(), self.next_pos());
        self.pos = self.next_pos();
        if self.pos == self.end_pos {
            self.pos = 0
        }
        result
    }
}

/// Counting semaphore.
pub struct Semaphore {
    count: Mutex<i32>,
    condition: Condvar,
}

impl Semaphore {
    pub fn new(init_count: i32) -> Self {
        Semaphore {
            count: Mutex::new(init_count),
            condition: Condvar::new(),
        }
    }

    pub fn acquire(&self) {
        let mut count = self.count.lock();
        while *count < 1 {
            self.condition.wait(&mut count);
        }
        *count -= 1;
    }

    pub fn release(&self) {
        let mut count = self.count.lock();
        *count += 1;
        self.condition.notify_one();
    }

    pub fn count(&self) -> i32 {
        *self.count.lock()
    }
}

#[cfg(test)]
mod test {
    use crate::utils::*;
    use std::sync::Arc;

    #[test]
    fn counter_single_chunk() {
        // Buffer larger than the sequence: every tick covers it all
        let mut counter = StreamCounter::new(5, 10);
        assert_eq!(counter.tick_next(), (0, 5));
        assert_eq!(counter.pos(), 0);
        assert_eq!(counter.tick_next(), (0, 5));
    }

    #[test]
    fn semaphore_blocks_until_released() {
        let sem = Arc::new(Semaphore::new(0));
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let sem = sem.clone();
                std::thread::spawn(move || sem.release())
            })
            .collect();
        // Returns only once all three releases happened
        (0..3).for_each(|_| sem.acquire());
        handles.into_iter().for_each(|h| h.join().unwrap());
        assert_eq!(sem.count(), 0);
    }
}

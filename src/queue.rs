use alloc::collections::VecDeque;

/// Bounded FIFO. When full, pushing a new element drops the oldest one, which suits producers that
/// always enqueue complete replacement state rather than deltas.
pub struct JobQueue<T> {
    jobs: VecDeque<T>,
    capacity: usize,
}

impl<T> JobQueue<T> {
    /// A capacity of zero is raised to one, so that the newest job is always kept.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            jobs: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends `job` and returns the job that was dropped to make room for it, if any.
    pub fn overwrite(&mut self, job: T) -> Option<T> {
        let dropped = if self.jobs.len() == self.capacity {
            self.jobs.pop_front()
        } else {
            None
        };
        self.jobs.push_back(job);
        dropped
    }

    pub fn pop(&mut self) -> Option<T> {
        self.jobs.pop_front()
    }

    pub fn is_readable(&self) -> bool {
        !self.jobs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

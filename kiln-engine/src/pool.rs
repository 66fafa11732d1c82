//! Dependency-aware work queue shared by extraction and selection.
//!
//! Tasks become runnable once all their dependencies have completed. Each
//! task holds a pending counter that starts at one (the creator's hold,
//! released after wiring), is incremented per unfinished dependency and
//! decremented as parents finish; at zero the task joins the ready queue.
//! Finished tasks are reclaimed from the head of the task list in FIFO
//! order, so handles to long-gone tasks simply count as complete.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use crate::lock;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Handle to an enqueued task, usable as a dependency of later tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskRef(u64);

/// Common interface of the threaded pool and the synchronous variant, so
/// callers can opt out of concurrency without changing shape.
pub trait Scheduler {
    fn enqueue(&self, task: Task) -> TaskRef {
        self.enqueue_after(task, &[])
    }

    fn enqueue_after(&self, task: Task, deps: &[TaskRef]) -> TaskRef;

    /// Block until every listed task has completed.
    fn wait(&self, deps: &[TaskRef]);

    /// Block until the pool is fully idle.
    fn wait_all(&self);
}

struct TaskNode {
    func: Option<Task>,
    pending: usize,
    children: Vec<u64>,
    done: bool,
}

struct PoolState {
    tasks: VecDeque<TaskNode>,
    base_id: u64,
    next_id: u64,
    ready: VecDeque<u64>,
    live: usize,
    stop: bool,
}

impl PoolState {
    fn node_mut(&mut self, id: u64) -> Option<&mut TaskNode> {
        let index = id.checked_sub(self.base_id)?;
        self.tasks.get_mut(index as usize)
    }

    fn release(&mut self, id: u64, ready_cv: &Condvar) {
        let node = self.node_mut(id).expect("released task is still tracked");
        node.pending -= 1;
        if node.pending == 0 {
            self.ready.push_back(id);
            ready_cv.notify_one();
        }
    }

    fn reclaim_head(&mut self) {
        while self.tasks.front().is_some_and(|node| node.done) {
            self.tasks.pop_front();
            self.base_id += 1;
        }
    }
}

struct Shared {
    state: Mutex<PoolState>,
    ready_cv: Condvar,
    idle_cv: Condvar,
}

/// Work queue backed by a fixed set of worker threads.
pub struct TaskPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl TaskPool {
    pub fn new(threads: usize) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(PoolState {
                tasks: VecDeque::new(),
                base_id: 0,
                next_id: 0,
                ready: VecDeque::new(),
                live: 0,
                stop: false,
            }),
            ready_cv: Condvar::new(),
            idle_cv: Condvar::new(),
        });
        let workers = (0..threads.max(1))
            .map(|_| {
                let shared = Arc::clone(&shared);
                thread::spawn(move || worker_loop(&shared))
            })
            .collect();
        Self { shared, workers }
    }

    /// One worker per available hardware thread.
    pub fn with_default_threads() -> Self {
        Self::new(thread::available_parallelism().map_or(4, |n| n.get()))
    }

    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }
}

impl Scheduler for TaskPool {
    fn enqueue_after(&self, task: Task, deps: &[TaskRef]) -> TaskRef {
        let mut state = lock(&self.shared.state);
        let id = state.next_id;
        state.next_id += 1;
        state.live += 1;
        state.tasks.push_back(TaskNode {
            func: Some(task),
            pending: 1,
            children: Vec::new(),
            done: false,
        });
        for dep in deps {
            let mut linked = false;
            if let Some(node) = state.node_mut(dep.0)
                && !node.done
            {
                node.children.push(id);
                linked = true;
            }
            if linked {
                let node = state.node_mut(id).expect("fresh task is tracked");
                node.pending += 1;
            }
        }
        // Wiring finished: drop the creator's hold.
        state.release(id, &self.shared.ready_cv);
        TaskRef(id)
    }

    fn wait(&self, deps: &[TaskRef]) {
        let done = Arc::new((Mutex::new(false), Condvar::new()));
        let sentinel = Arc::clone(&done);
        self.enqueue_after(
            Box::new(move || {
                let (flag, cv) = &*sentinel;
                *lock(flag) = true;
                cv.notify_all();
            }),
            deps,
        );
        let (flag, cv) = &*done;
        let mut guard = lock(flag);
        while !*guard {
            guard = cv.wait(guard).unwrap_or_else(|e| e.into_inner());
        }
    }

    fn wait_all(&self) {
        let mut state = lock(&self.shared.state);
        while state.live > 0 {
            state = self
                .shared
                .idle_cv
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        {
            let mut state = lock(&self.shared.state);
            state.stop = true;
        }
        self.shared.ready_cv.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let (id, func) = {
            let mut state = lock(&shared.state);
            loop {
                if state.stop {
                    return;
                }
                if let Some(id) = state.ready.pop_front() {
                    let func = state
                        .node_mut(id)
                        .and_then(|node| node.func.take())
                        .expect("ready task has its function");
                    break (id, func);
                }
                state = shared
                    .ready_cv
                    .wait(state)
                    .unwrap_or_else(|e| e.into_inner());
            }
        };

        func();

        let mut state = lock(&shared.state);
        let node = state.node_mut(id).expect("finished task is still tracked");
        node.done = true;
        let children = std::mem::take(&mut node.children);
        for child in children {
            state.release(child, &shared.ready_cv);
        }
        state.live -= 1;
        state.reclaim_head();
        if state.live == 0 {
            shared.idle_cv.notify_all();
        }
    }
}

/// Synchronous stand-in: every task runs immediately on the calling thread,
/// so dependencies are trivially satisfied and waits return at once.
pub struct InlinePool;

impl Scheduler for InlinePool {
    fn enqueue_after(&self, task: Task, _deps: &[TaskRef]) -> TaskRef {
        task();
        TaskRef(0)
    }

    fn wait(&self, _deps: &[TaskRef]) {}

    fn wait_all(&self) {}
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Macrotask plumbing: the task pool, the timer thread and the blocking
//! worker pool.
//!
//! Tasks hold JS values, so the pool is part of the GC root set. Timers are
//! tracked on a dedicated thread with a deadline heap; firing posts the
//! task id through a channel the main thread blocks on between tasks.
//! Worker threads never touch the JS heap: a blocking job produces a plain
//! [`TaskPayload`], and Value construction from it happens on the main
//! thread at dispatch.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use ahash::AHashMap;
use crossbeam_channel::{Receiver, Sender, unbounded};
use hashbrown::HashSet;
use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::bytecode::NativeFn;
use crate::value::Value;

/// One scheduled piece of work: a user function or a native entry plus its
/// argument vector.
#[derive(Debug)]
pub struct Task {
    pub id: u64,
    pub callable: Value,
    pub native: Option<NativeFn>,
    pub args: Vec<Value>,
    /// Worker-produced text, converted to a heap string on the main thread
    /// right before the call.
    pub pending_text: Option<String>,
    pub timeout: u64,
    pub repeat: bool,
    pub canceled: bool,
}

impl Task {
    pub fn gather_roots(&mut self, out: &mut Vec<*mut Value>) {
        out.push(&mut self.callable as *mut Value);
        for arg in self.args.iter_mut() {
            out.push(arg as *mut Value);
        }
    }
}

/// Result of a blocking worker job, converted to values at dispatch.
#[derive(Debug)]
pub enum TaskPayload {
    None,
    Text(String),
    Number(f64),
}

pub struct EventLoop {
    /// Every not-yet-completed macrotask lives here.
    pub task_pool: AHashMap<u64, Task>,
    next_task_id: u64,
    ready_rx: Receiver<u64>,
    ready_tx: Sender<u64>,
    payload_rx: Receiver<(u64, TaskPayload)>,
    payload_tx: Sender<(u64, TaskPayload)>,
    timers: TimerThread,
    workers: WorkerPool,
    /// In-flight worker jobs; keeps the loop alive until they post back.
    in_flight_jobs: usize,
}

impl EventLoop {
    pub fn new(worker_threads: usize) -> Self {
        let (ready_tx, ready_rx) = unbounded();
        let (payload_tx, payload_rx) = unbounded();
        let timers = TimerThread::start(ready_tx.clone());
        let workers = WorkerPool::start(worker_threads.max(1));
        Self {
            task_pool: AHashMap::new(),
            next_task_id: 0,
            ready_rx,
            ready_tx,
            payload_rx,
            payload_tx,
            timers,
            workers,
            in_flight_jobs: 0,
        }
    }

    fn put_task(&mut self, task: Task) -> u64 {
        let id = task.id;
        self.task_pool.insert(id, task);
        id
    }

    fn fresh_id(&mut self) -> u64 {
        self.next_task_id += 1;
        self.next_task_id
    }

    /// Register a timer-driven task (`setTimeout`/`setInterval`).
    pub fn add_timer_task(
        &mut self,
        callable: Value,
        args: Vec<Value>,
        timeout_ms: u64,
        repeat: bool,
    ) -> u64 {
        let id = self.fresh_id();
        self.put_task(Task {
            id,
            callable,
            native: None,
            args,
            pending_text: None,
            timeout: timeout_ms,
            repeat,
            canceled: false,
        });
        self.timers.register(id, timeout_ms, repeat);
        trace!(id, timeout_ms, repeat, "timer registered");
        id
    }

    /// Cancel a timer by id. A task already in the ready queue is marked
    /// canceled and skipped at dispatch.
    pub fn remove_timer(&mut self, id: u64) -> bool {
        self.timers.cancel(id);
        match self.task_pool.get_mut(&id) {
            Some(task) => {
                task.canceled = true;
                true
            }
            None => false,
        }
    }

    /// Submit blocking work to the worker pool. The returned task runs on
    /// the main thread once the job posts its payload back.
    pub fn submit_blocking(
        &mut self,
        callable: Value,
        job: Box<dyn FnOnce() -> TaskPayload + Send>,
    ) -> u64 {
        let id = self.fresh_id();
        self.put_task(Task {
            id,
            callable,
            native: None,
            args: Vec::new(),
            pending_text: None,
            timeout: 0,
            repeat: false,
            canceled: false,
        });
        self.in_flight_jobs += 1;
        let payload_tx = self.payload_tx.clone();
        self.workers.submit(Box::new(move || {
            let payload = job();
            let _ = payload_tx.send((id, payload));
        }));
        id
    }

    /// Anything left that can wake us up?
    pub fn has_pending(&self) -> bool {
        self.in_flight_jobs > 0
            || self.task_pool.values().any(|t| !t.canceled)
    }

    /// Block until the next macrotask is ready; `None` once the loop is
    /// idle for good. Worker payloads are converted to argument values
    /// here, on the main thread.
    pub fn next_ready(&mut self) -> Option<u64> {
        loop {
            if !self.has_pending() {
                return None;
            }
            crossbeam_channel::select! {
                recv(self.ready_rx) -> id => {
                    let id = id.ok()?;
                    return Some(id);
                }
                recv(self.payload_rx) -> msg => {
                    let (id, payload) = msg.ok()?;
                    self.in_flight_jobs -= 1;
                    if let Some(task) = self.task_pool.get_mut(&id) {
                        match payload {
                            TaskPayload::None => {}
                            TaskPayload::Number(n) => {
                                task.args.push(Value::F64(n));
                            }
                            TaskPayload::Text(text) => {
                                task.pending_text = Some(text);
                            }
                        }
                    }
                    return Some(id);
                }
            }
        }
    }

    /// Pull the task out for execution. Repeating timers stay pooled.
    pub fn take_task(&mut self, id: u64) -> Option<Task> {
        let repeat = self.task_pool.get(&id).map(|t| t.repeat)?;
        if repeat {
            let task = self.task_pool.get(&id)?;
            if task.canceled {
                self.task_pool.remove(&id);
                return None;
            }
            // Leave the pooled task in place; hand out a borrow-free copy.
            Some(Task {
                id,
                callable: task.callable,
                native: task.native,
                args: task.args.clone(),
                pending_text: None,
                timeout: task.timeout,
                repeat: true,
                canceled: false,
            })
        } else {
            let task = self.task_pool.remove(&id)?;
            if task.canceled { None } else { Some(task) }
        }
    }

    pub fn gather_roots(&mut self, out: &mut Vec<*mut Value>) {
        for task in self.task_pool.values_mut() {
            task.gather_roots(out);
        }
    }

    pub fn shutdown(&mut self) {
        self.timers.stop();
        self.workers.stop();
    }
}

// ---------------------------------------------------------------------
// Timer thread
// ---------------------------------------------------------------------

struct TimerEntry {
    deadline: Instant,
    id: u64,
    repeat: Option<Duration>,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}
impl Eq for TimerEntry {}
impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.deadline.cmp(&other.deadline).then(self.id.cmp(&other.id))
    }
}

#[derive(Default)]
struct TimerQueue {
    heap: BinaryHeap<Reverse<TimerEntry>>,
    canceled: HashSet<u64>,
}

struct TimerShared {
    queue: Mutex<TimerQueue>,
    cvar: Condvar,
    stop: AtomicBool,
}

struct TimerThread {
    shared: Arc<TimerShared>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl TimerThread {
    fn start(ready_tx: Sender<u64>) -> Self {
        let shared = Arc::new(TimerShared {
            queue: Mutex::new(TimerQueue::default()),
            cvar: Condvar::new(),
            stop: AtomicBool::new(false),
        });
        let thread_shared = shared.clone();
        let thread = std::thread::Builder::new()
            .name("vesper-timer".into())
            .spawn(move || timer_thread_main(thread_shared, ready_tx))
            .expect("failed to spawn the timer thread");
        Self { shared, thread: Some(thread) }
    }

    fn register(&self, id: u64, timeout_ms: u64, repeat: bool) {
        let mut queue = self.shared.queue.lock();
        queue.canceled.remove(&id);
        queue.heap.push(Reverse(TimerEntry {
            deadline: Instant::now() + Duration::from_millis(timeout_ms),
            id,
            repeat: repeat.then(|| Duration::from_millis(timeout_ms)),
        }));
        self.shared.cvar.notify_all();
    }

    fn cancel(&self, id: u64) {
        let mut queue = self.shared.queue.lock();
        queue.canceled.insert(id);
        self.shared.cvar.notify_all();
    }

    fn stop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        self.shared.cvar.notify_all();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn timer_thread_main(shared: Arc<TimerShared>, ready_tx: Sender<u64>) {
    let mut queue = shared.queue.lock();
    loop {
        if shared.stop.load(Ordering::Acquire) {
            return;
        }
        let now = Instant::now();
        match queue.heap.peek() {
            None => {
                shared.cvar.wait(&mut queue);
            }
            Some(Reverse(entry)) if entry.deadline > now => {
                let deadline = entry.deadline;
                shared.cvar.wait_until(&mut queue, deadline);
            }
            Some(_) => {
                let Reverse(entry) = queue.heap.pop().unwrap();
                if queue.canceled.remove(&entry.id) {
                    continue;
                }
                if let Some(interval) = entry.repeat {
                    queue.heap.push(Reverse(TimerEntry {
                        deadline: entry.deadline + interval,
                        id: entry.id,
                        repeat: Some(interval),
                    }));
                }
                let _ = ready_tx.send(entry.id);
            }
        }
    }
}

// ---------------------------------------------------------------------
// Worker pool
// ---------------------------------------------------------------------

type Job = Box<dyn FnOnce() + Send>;

struct WorkerPool {
    job_tx: Option<Sender<Job>>,
    threads: Vec<std::thread::JoinHandle<()>>,
}

impl WorkerPool {
    fn start(count: usize) -> Self {
        let (job_tx, job_rx) = unbounded::<Job>();
        let mut threads = Vec::with_capacity(count);
        for i in 0..count {
            let rx = job_rx.clone();
            threads.push(
                std::thread::Builder::new()
                    .name(format!("vesper-worker-{i}"))
                    .spawn(move || {
                        while let Ok(job) = rx.recv() {
                            job();
                        }
                    })
                    .expect("failed to spawn a worker thread"),
            );
        }
        Self { job_tx: Some(job_tx), threads }
    }

    fn submit(&self, job: Job) {
        if let Some(tx) = &self.job_tx {
            let _ = tx.send(job);
        }
    }

    fn stop(&mut self) {
        // Dropping the sender ends every worker's recv loop.
        self.job_tx = None;
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_fires_in_deadline_order() {
        let (tx, rx) = unbounded();
        let mut timers = TimerThread::start(tx);
        timers.register(1, 30, false);
        timers.register(2, 5, false);
        let first = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        let second = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!((first, second), (2, 1));
        timers.stop();
    }

    #[test]
    fn canceled_timer_does_not_fire() {
        let (tx, rx) = unbounded();
        let mut timers = TimerThread::start(tx);
        timers.register(7, 40, false);
        timers.cancel(7);
        assert!(rx.recv_timeout(Duration::from_millis(120)).is_err());
        timers.stop();
    }

    #[test]
    fn worker_pool_posts_payloads_back() {
        let mut event_loop = EventLoop::new(2);
        let id = event_loop.submit_blocking(
            Value::Undefined,
            Box::new(|| TaskPayload::Number(21.0)),
        );
        assert!(event_loop.has_pending());
        let ready = event_loop.next_ready().unwrap();
        assert_eq!(ready, id);
        let task = event_loop.take_task(id).unwrap();
        assert!(matches!(task.args.as_slice(), [Value::F64(n)] if *n == 21.0));
        event_loop.shutdown();
    }
}

//! Executors used by the decode pipeline
//!
//! - [`WorkerPool`]: a fixed set of background threads for CPU-bound decode
//!   work. Created and shut down explicitly.
//! - [`DeliveryQueue`] / [`DeliveryPump`]: a task queue drained by the one
//!   thread that owns buffer construction. The owning thread either pumps it
//!   from its own loop or hands itself over with [`DeliveryPump::run`].

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::RwLock;

/// A unit of work that can be handed to an executor
pub trait Job: Send + 'static {
    fn run(self: Box<Self>);
}

impl<F> Job for F
where
    F: FnOnce() + Send + 'static,
{
    fn run(self: Box<Self>) {
        (*self)()
    }
}

enum Message {
    Run(Box<dyn Job>),
    Stop,
}

/// Background worker pool
pub struct WorkerPool {
    handle: PoolHandle,
    workers: Vec<JoinHandle<()>>,
}

/// Cloneable submission handle for a [`WorkerPool`]
#[derive(Clone)]
pub struct PoolHandle {
    sender: Sender<Message>,
    /// Held for reading while submitting so no job can land behind the
    /// stop messages
    closed: Arc<RwLock<bool>>,
}

impl WorkerPool {
    /// Start `threads` workers (at least one)
    pub fn new(threads: usize) -> std::io::Result<Self> {
        let threads = threads.max(1);
        let (sender, receiver) = unbounded::<Message>();

        let mut workers = Vec::with_capacity(threads);
        for i in 0..threads {
            let receiver = receiver.clone();
            let worker = thread::Builder::new()
                .name(format!("wavefeed-worker-{}", i))
                .spawn(move || worker_loop(receiver))?;
            workers.push(worker);
        }

        log::info!("Started worker pool with {} thread(s)", threads);

        Ok(Self {
            handle: PoolHandle {
                sender,
                closed: Arc::new(RwLock::new(false)),
            },
            workers,
        })
    }

    pub fn handle(&self) -> PoolHandle {
        self.handle.clone()
    }

    /// Stop accepting work, let queued jobs finish and join every worker
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if self.workers.is_empty() {
            return;
        }

        {
            let mut closed = self.handle.closed.write();
            *closed = true;
            // Stop messages queue up behind pending jobs, so those still run
            for _ in 0..self.workers.len() {
                let _ = self.handle.sender.send(Message::Stop);
            }
        }
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::error!("Worker thread panicked during shutdown");
            }
        }
        log::info!("Worker pool shut down");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

impl PoolHandle {
    /// Queue a job. Returns it unchanged if the pool has shut down.
    pub fn spawn<J: Job>(&self, job: J) -> Result<(), J> {
        let closed = self.closed.read();
        if *closed {
            return Err(job);
        }
        if self.sender.send(Message::Run(Box::new(job))).is_err() {
            log::error!("Worker pool has no running workers, job dropped");
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.read()
    }
}

fn worker_loop(receiver: Receiver<Message>) {
    for message in receiver.iter() {
        match message {
            Message::Run(job) => run_guarded(move || job.run()),
            Message::Stop => break,
        }
    }
}

/// Run a task, logging instead of unwinding through the executor
fn run_guarded(task: impl FnOnce()) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
        log::error!("Task panicked: {}", panic_message(payload.as_ref()));
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Posting side of the delivery thread's task queue
#[derive(Clone)]
pub struct DeliveryQueue {
    sender: Sender<Box<dyn Job>>,
}

/// Receiving side of the delivery queue, owned by the delivery thread
pub struct DeliveryPump {
    receiver: Receiver<Box<dyn Job>>,
}

/// Create a delivery queue and the pump that drains it
pub fn delivery_queue() -> (DeliveryQueue, DeliveryPump) {
    let (sender, receiver) = unbounded();
    (DeliveryQueue { sender }, DeliveryPump { receiver })
}

impl DeliveryQueue {
    /// Queue a task for the delivery thread. Returns `false` if the pump is
    /// gone, in which case the task is dropped without running.
    pub fn post<J: Job>(&self, job: J) -> bool {
        self.sender.send(Box::new(job)).is_ok()
    }
}

impl DeliveryPump {
    /// Run every task that is already queued, without waiting
    pub fn pump(&self) -> usize {
        let mut ran = 0;
        for job in self.receiver.try_iter() {
            run_guarded(move || job.run());
            ran += 1;
        }
        ran
    }

    /// Wait up to `timeout` for a task, then run everything queued
    pub fn pump_timeout(&self, timeout: Duration) -> usize {
        match self.receiver.recv_timeout(timeout) {
            Ok(job) => {
                run_guarded(move || job.run());
                1 + self.pump()
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => 0,
        }
    }

    /// Number of tasks waiting
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }

    /// Block the current thread running tasks until every queue handle has
    /// been dropped
    pub fn run(self) {
        for job in self.receiver.iter() {
            run_guarded(move || job.run());
        }
        log::debug!("Delivery queue closed");
    }

    /// Move the pump onto a dedicated, named delivery thread
    pub fn spawn(self, name: &str) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || self.run())
    }
}

//! Background reader and delivery worker pool.
//!
//! One reader thread owns the read half of the connection and decodes frames
//! in wire order. Decoded messages are classified on the reader and handed to
//! a fixed pool of delivery workers through a bounded job queue; when the
//! queue is full the reader waits, which back-pressures the daemon.
//!
//! Under the blocking overflow policy only `workers - 1` workers may wait on a
//! full handler queue; the last one keeps routing answers and rejecting
//! surplus requests, so the reader never stalls behind a slow handler.
//!
//! When the read half fails or reaches end of stream the reader stops
//! accepting jobs, tells blocked deliveries to give up, lets the workers drain
//! what was already queued, and then closes both registries so every waiter
//! wakes.

mod routing;

use std::io::Read;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use p2pd_types::Response;

use crate::error::MuxError;
use crate::framing::FrameReader;
use crate::state::{CloseReason, Shared};
use crate::telemetry::DISPATCH_TARGET;

use self::routing::Job;

/// Sizing of the delivery pool.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PoolSize {
    pub(crate) workers: usize,
    pub(crate) queue: usize,
}

/// Handle to the background reader thread.
pub(crate) struct DispatchHandle {
    reader: Option<JoinHandle<()>>,
}

impl DispatchHandle {
    /// Starts the delivery workers and then the reader.
    pub(crate) fn spawn<R>(
        reader: FrameReader<R>,
        shared: &Arc<Shared>,
        size: PoolSize,
    ) -> Result<Self, MuxError>
    where
        R: Read + Send + 'static,
    {
        let (jobs, queue) = crossbeam_channel::bounded(size.queue);
        let workers = spawn_workers(&queue, shared, size.workers)?;
        drop(queue);

        let reader_shared = Arc::clone(shared);
        let handle = thread::Builder::new()
            .name("p2pd-mux-reader".to_owned())
            .spawn(move || run_reader(reader, &reader_shared, jobs, workers))
            .map_err(|source| MuxError::Spawn {
                thread: "reader",
                source,
            })?;
        Ok(Self {
            reader: Some(handle),
        })
    }

    /// Waits for the reader thread, and through it the workers, to finish.
    pub(crate) fn join(mut self) -> Result<(), MuxError> {
        match self.reader.take().map(JoinHandle::join) {
            Some(Err(_)) => Err(MuxError::DispatchPanicked),
            Some(Ok(())) | None => Ok(()),
        }
    }
}

fn spawn_workers(
    queue: &Receiver<Job>,
    shared: &Arc<Shared>,
    count: usize,
) -> Result<Vec<JoinHandle<()>>, MuxError> {
    let mut workers = Vec::with_capacity(count);
    for index in 0..count {
        let jobs = queue.clone();
        let worker_shared = Arc::clone(shared);
        let handle = thread::Builder::new()
            .name(format!("p2pd-mux-worker-{index}"))
            .spawn(move || run_worker(&jobs, &worker_shared))
            .map_err(|source| MuxError::Spawn {
                thread: "delivery worker",
                source,
            })?;
        workers.push(handle);
    }
    Ok(workers)
}

fn run_worker(jobs: &Receiver<Job>, shared: &Shared) {
    for job in jobs {
        routing::run(job, shared);
    }
}

fn run_reader<R: Read>(
    mut reader: FrameReader<R>,
    shared: &Shared,
    jobs: Sender<Job>,
    workers: Vec<JoinHandle<()>>,
) {
    tracing::debug!(target: DISPATCH_TARGET, "dispatch loop started");
    let reason = read_until_closed(&mut reader, shared, &jobs);
    drop(reader);
    drop(jobs);
    shared.stop_delivering();
    for worker in workers {
        if worker.join().is_err() {
            tracing::error!(target: DISPATCH_TARGET, "delivery worker panicked");
        }
    }
    shared.close(reason);
}

fn read_until_closed<R: Read>(
    reader: &mut FrameReader<R>,
    shared: &Shared,
    jobs: &Sender<Job>,
) -> CloseReason {
    loop {
        match reader.read_message::<Response>() {
            Ok(Some(message)) => {
                let Some(job) = routing::classify(message, shared) else {
                    continue;
                };
                if jobs.send(job).is_err() {
                    return CloseReason::ReadFailed {
                        error: "delivery workers exited".to_owned(),
                    };
                }
            }
            Ok(None) => return closed_by(shared, CloseReason::EndOfStream),
            Err(error) => {
                tracing::debug!(
                    target: DISPATCH_TARGET,
                    error = %error,
                    "failed to read message from connection"
                );
                return closed_by(
                    shared,
                    CloseReason::ReadFailed {
                        error: error.to_string(),
                    },
                );
            }
        }
    }
}

/// Attributes the end of the stream to a local shutdown when one is underway.
fn closed_by(shared: &Shared, observed: CloseReason) -> CloseReason {
    if shared.is_closing() {
        CloseReason::LocalShutdown
    } else {
        observed
    }
}

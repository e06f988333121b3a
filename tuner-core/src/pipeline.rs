//! # Pipeline Module
//!
//! Connects the buffer pool to the analyzer.
//!
//! ## Dispatch modes
//! - **Inline**: the producer analyses each buffer itself before returning
//! - **Worker**: filled buffers are queued for a background thread and the
//!   producer returns immediately
//!
//! In both modes a buffer goes back to the pool only after its analysis
//! completes, and buffers are analysed in the order they were filled.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use log::{error, info, warn};
use parking_lot::Mutex;

use crate::AnalysisResult;
use crate::analyzer::{AnalyzerStats, PitchAnalyzer};
use crate::buffer_pool::{BufferPool, PooledBuffer};
use crate::config::{Dispatch, TunerConfig};
use crate::error::Result;
use crate::float::Float;
use crate::plan_store::PlanStore;

/// How often an idle worker checks its stop flag.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Background thread analysing queued buffers.
///
/// The thread checks a cooperative stop flag between buffers; an analysis in
/// progress always runs to completion.
pub struct AnalysisWorker<T: Float> {
    queue: Sender<PooledBuffer<T>>,
    stop: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<PitchAnalyzer<T>>>,
}

impl<T: Float> AnalysisWorker<T> {
    /// Moves `analyzer` onto a new thread.
    pub fn spawn(analyzer: PitchAnalyzer<T>) -> Self {
        let (queue, buffers) = unbounded();
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);

        let thread_handle = thread::spawn(move || run_worker(analyzer, buffers, thread_stop));
        Self {
            queue,
            stop,
            thread_handle: Some(thread_handle),
        }
    }

    /// Queues a filled buffer. Returns it if the worker has already exited.
    pub fn submit(&self, buffer: PooledBuffer<T>) -> std::result::Result<(), PooledBuffer<T>> {
        self.queue.send(buffer).map_err(|e| e.into_inner())
    }

    /// Buffers waiting for the worker.
    pub fn backlog(&self) -> usize {
        self.queue.len()
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Raises the stop flag and waits for the thread.
    ///
    /// Queued buffers that were not analysed yet return to the pool.
    /// Returns the analyzer, or `None` if the worker panicked.
    pub fn stop(mut self) -> Option<PitchAnalyzer<T>> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Option<PitchAnalyzer<T>> {
        self.stop.store(true, Ordering::Release);
        let handle = self.thread_handle.take()?;
        match handle.join() {
            Ok(analyzer) => Some(analyzer),
            Err(_) => {
                error!("[WORKER] Analysis thread panicked");
                None
            }
        }
    }
}

impl<T: Float> Drop for AnalysisWorker<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker<T: Float>(
    mut analyzer: PitchAnalyzer<T>,
    buffers: Receiver<PooledBuffer<T>>,
    stop: Arc<AtomicBool>,
) -> PitchAnalyzer<T> {
    info!("[WORKER] Analysis thread started");
    while !stop.load(Ordering::Acquire) {
        match buffers.recv_timeout(STOP_POLL_INTERVAL) {
            Ok(buffer) => {
                if let Err(e) = analyzer.analyze(&buffer) {
                    error!("[WORKER] Analysis of buffer {} failed: {}", buffer.id(), e);
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    info!("[WORKER] Analysis thread stopped");
    analyzer
}

enum Dispatcher<T: Float> {
    Inline(Mutex<PitchAnalyzer<T>>),
    Worker(AnalysisWorker<T>),
}

/// A buffer pool plus an initialized analyzer, ready for a producer.
///
/// The producer loop is: [`acquire`](Self::acquire) a buffer, fill it, pass
/// it to [`buffer_filled`](Self::buffer_filled).
pub struct Tuner<T: Float> {
    pool: BufferPool<T>,
    dispatcher: Dispatcher<T>,
}

impl<T: Float> Tuner<T> {
    /// Builds and initializes the analyzer for `sampling_frequency` and
    /// registers `sink` as its result callback.
    ///
    /// # Errors
    /// * Any configuration or initialization error of the analyzer
    pub fn new(
        config: TunerConfig,
        store: Arc<dyn PlanStore>,
        sampling_frequency: f64,
        sink: impl FnMut(AnalysisResult<T>) + Send + 'static,
    ) -> Result<Self> {
        let pool = BufferPool::new(config.pool_depth, config.buffer_len);
        let dispatch = config.dispatch;

        let mut analyzer = PitchAnalyzer::new(config, store)?;
        let config = analyzer.config().clone();
        analyzer.initialize(
            config.min_frequency,
            config.max_frequency,
            config.base_frequency,
            sampling_frequency,
        )?;
        analyzer.set_sound_analyzed_callback(sink);

        let dispatcher = match dispatch {
            Dispatch::Inline => Dispatcher::Inline(Mutex::new(analyzer)),
            Dispatch::Worker => Dispatcher::Worker(AnalysisWorker::spawn(analyzer)),
        };
        Ok(Self { pool, dispatcher })
    }

    pub fn pool(&self) -> &BufferPool<T> {
        &self.pool
    }

    /// Next empty buffer for the producer; blocks while all are in use.
    pub fn acquire(&self) -> PooledBuffer<T> {
        self.pool.acquire()
    }

    /// Hands a filled buffer to analysis.
    ///
    /// Inline dispatch analyses before returning; worker dispatch queues the
    /// buffer. The buffer returns to the pool once analysed.
    pub fn buffer_filled(&self, buffer: PooledBuffer<T>) -> Result<()> {
        let buffer = buffer.hand_off();
        match &self.dispatcher {
            Dispatcher::Inline(analyzer) => analyzer.lock().analyze(&buffer),
            Dispatcher::Worker(worker) => {
                if let Err(buffer) = worker.submit(buffer) {
                    warn!(
                        "[WORKER] Analysis thread gone, returning buffer {} unanalysed",
                        buffer.id()
                    );
                }
                Ok(())
            }
        }
    }

    /// Stops the pipeline and returns the analyzer's counters.
    pub fn shutdown(self) -> Option<AnalyzerStats> {
        let stats = match self.dispatcher {
            Dispatcher::Inline(analyzer) => Some(analyzer.into_inner().stats()),
            Dispatcher::Worker(worker) => worker.stop().map(|analyzer| analyzer.stats()),
        };
        if let Some(stats) = stats {
            info!(
                "[ANALYZER] Pipeline stopped: {} readings, {} skipped",
                stats.analyzed, stats.skipped
            );
        }
        stats
    }
}

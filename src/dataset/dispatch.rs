//! Per-stream work distribution.
//!
//! Streams are independent, so every dataset operation is a map over
//! streams followed by a sequential reduction in stream order. The map runs
//! on a rayon pool (or inline in sequential mode); the reduction order is
//! fixed so both modes produce identical results.

use crate::trace::{EventStream, StreamId};
use crate::utils::config::{EngineConfig, ExecutionMode};
use crate::utils::error::TraceError;
use log::{debug, warn};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag shared between a caller and a dispatcher
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop issuing new per-stream work
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Re-arm after a cancelled call
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }
}

/// Runs per-stream operations according to the engine configuration
#[derive(Debug, Clone)]
pub struct Dispatcher {
    mode: ExecutionMode,
    pool: Option<Arc<ThreadPool>>,
    token: CancellationToken,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}

impl Dispatcher {
    /// Build a dispatcher; a dedicated pool is created when `worker_threads` is set
    ///
    /// Falls back to the global pool if the dedicated one cannot be built.
    pub fn new(config: &EngineConfig) -> Self {
        let pool = match (config.execution, config.worker_threads) {
            (ExecutionMode::Parallel, Some(threads)) => {
                match ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .thread_name(|i| format!("trace-worker-{}", i))
                    .build()
                {
                    Ok(pool) => {
                        debug!("Created worker pool with {} threads", threads);
                        Some(Arc::new(pool))
                    }
                    Err(e) => {
                        warn!("Failed to build worker pool, using global pool: {}", e);
                        None
                    }
                }
            }
            _ => None,
        };

        Self {
            mode: config.execution,
            pool,
            token: CancellationToken::new(),
        }
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Token that cancels work issued by this dispatcher
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Number of workers available to parallel maps
    pub fn worker_count(&self) -> usize {
        match (self.mode, &self.pool) {
            (ExecutionMode::Sequential, _) => 1,
            (ExecutionMode::Parallel, Some(pool)) => pool.current_num_threads(),
            (ExecutionMode::Parallel, None) => rayon::current_num_threads(),
        }
    }

    fn install<R: Send>(&self, f: impl FnOnce() -> R + Send) -> R {
        match &self.pool {
            Some(pool) => pool.install(f),
            None => f(),
        }
    }

    fn guard(&self, stream: &EventStream) -> Result<(), TraceError> {
        if self.token.is_cancelled() {
            debug!("Skipping {}: cancelled", stream.id());
            return Err(TraceError::Cancelled);
        }
        Ok(())
    }

    /// Apply `op` to every stream, read-only
    ///
    /// # Errors
    /// * `TraceError::Cancelled` - token was cancelled at any point
    /// * otherwise the first error in stream order
    pub fn try_map<R, F>(
        &self,
        streams: &BTreeMap<StreamId, EventStream>,
        op: F,
    ) -> Result<BTreeMap<StreamId, R>, TraceError>
    where
        R: Send,
        F: Fn(&EventStream) -> Result<R, TraceError> + Sync + Send,
    {
        debug!("Dispatching read-only op over {} streams ({:?})", streams.len(), self.mode);
        let run = |(id, stream): (&StreamId, &EventStream)| {
            self.guard(stream)?;
            op(stream).map(|r| (*id, r))
        };

        let results: Vec<Result<(StreamId, R), TraceError>> = match self.mode {
            ExecutionMode::Sequential => streams.iter().map(run).collect(),
            ExecutionMode::Parallel => self.install(|| streams.par_iter().map(run).collect()),
        };
        self.collect(results)
    }

    /// Apply `op` to every stream's own storage in place
    ///
    /// Errors as [`Dispatcher::try_map`].
    pub fn try_map_mut<R, F>(
        &self,
        streams: &mut BTreeMap<StreamId, EventStream>,
        op: F,
    ) -> Result<BTreeMap<StreamId, R>, TraceError>
    where
        R: Send,
        F: Fn(&mut EventStream) -> Result<R, TraceError> + Sync + Send,
    {
        debug!("Dispatching in-place op over {} streams ({:?})", streams.len(), self.mode);
        let run = |(id, stream): (&StreamId, &mut EventStream)| {
            self.guard(stream)?;
            op(stream).map(|r| (*id, r))
        };

        let results: Vec<Result<(StreamId, R), TraceError>> = match self.mode {
            ExecutionMode::Sequential => streams.iter_mut().map(run).collect(),
            ExecutionMode::Parallel => self.install(|| streams.par_iter_mut().map(run).collect()),
        };
        self.collect(results)
    }

    fn collect<R>(
        &self,
        results: Vec<Result<(StreamId, R), TraceError>>,
    ) -> Result<BTreeMap<StreamId, R>, TraceError> {
        if self.token.is_cancelled() {
            return Err(TraceError::Cancelled);
        }
        results.into_iter().collect()
    }
}

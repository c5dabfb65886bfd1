//! Decoder fan-out pool.
//!
//! One long-lived worker thread per decoder branch. Each frame's
//! intermediate tensor is sent to every worker and the caller blocks until
//! all of them answered or one failed. The first failing branch raises a
//! per-frame cancel flag; running siblings see it through
//! [`ModelSession::run_cancellable`](crate::runtime_adapter::ModelSession::run_cancellable)
//! and siblings that have not started yet skip their session.

use crate::error::PipelineError;
use crate::runtime_adapter::{AdapterError, InferenceSession, TensorMap};
use crossbeam_channel::{bounded, Receiver, Sender};
use ndarray::ArrayD;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

type BranchOutcome = Result<TensorMap, PipelineError>;

struct DecodeJob {
    input: Arc<ArrayD<f32>>,
    cancel: Arc<AtomicBool>,
    results: Sender<(usize, BranchOutcome)>,
}

struct Worker {
    name: String,
    jobs: Option<Sender<DecodeJob>>,
    handle: Option<JoinHandle<()>>,
}

/// Runs N decoder sessions concurrently on the same input.
pub struct DecoderPool {
    workers: Vec<Worker>,
}

impl DecoderPool {
    /// Spawn one worker per `(name, session)` branch.
    pub fn new(branches: Vec<(String, InferenceSession)>) -> std::io::Result<Self> {
        let mut workers = Vec::with_capacity(branches.len());
        for (index, (name, session)) in branches.into_iter().enumerate() {
            let (tx, rx) = bounded::<DecodeJob>(1);
            let branch = name.clone();
            let handle = std::thread::Builder::new()
                .name(format!("arbench-decode-{}", name))
                .spawn(move || branch_loop(index, branch, session, rx))?;
            workers.push(Worker {
                name,
                jobs: Some(tx),
                handle: Some(handle),
            });
        }
        Ok(Self { workers })
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn branch_names(&self) -> impl Iterator<Item = &str> {
        self.workers.iter().map(|w| w.name.as_str())
    }

    /// Run every branch on `input` and merge their outputs.
    ///
    /// Output names are kept as-is unless two branches produce the same
    /// name, in which case those entries become `"<branch>/<name>"`.
    pub fn decode(&self, input: ArrayD<f32>) -> Result<TensorMap, PipelineError> {
        let input = Arc::new(input);
        let cancel = Arc::new(AtomicBool::new(false));
        let (results_tx, results_rx) = bounded(self.workers.len().max(1));

        for worker in &self.workers {
            let jobs = worker.jobs.as_ref().ok_or(PipelineError::Shutdown)?;
            jobs.send(DecodeJob {
                input: Arc::clone(&input),
                cancel: Arc::clone(&cancel),
                results: results_tx.clone(),
            })
            .map_err(|_| PipelineError::Shutdown)?;
        }
        drop(results_tx);

        // A failure returns at once; late sibling replies land in a closed channel.
        let mut outcomes: Vec<Option<TensorMap>> = vec![None; self.workers.len()];
        let mut cancelled = None;
        for _ in 0..self.workers.len() {
            let (index, outcome) = results_rx.recv().map_err(|_| PipelineError::Shutdown)?;
            match outcome {
                Ok(outputs) => outcomes[index] = Some(outputs),
                Err(e @ PipelineError::BranchCancelled { .. }) => {
                    cancelled.get_or_insert(e);
                }
                Err(e) => return Err(e),
            }
        }
        if let Some(e) = cancelled {
            return Err(e);
        }

        let mut merged = Vec::with_capacity(outcomes.len());
        for (worker, outputs) in self.workers.iter().zip(outcomes) {
            merged.push((worker.name.as_str(), outputs.ok_or(PipelineError::Shutdown)?));
        }
        Ok(merge_outputs(merged))
    }
}

fn branch_loop(index: usize, name: String, session: InferenceSession, jobs: Receiver<DecodeJob>) {
    for job in jobs {
        let outcome = if job.cancel.load(Ordering::Acquire) {
            Err(PipelineError::BranchCancelled { branch: name.clone() })
        } else {
            run_branch(&name, &session, &job.input, &job.cancel)
        };
        if matches!(outcome, Err(PipelineError::BranchFailed { .. })) {
            job.cancel.store(true, Ordering::Release);
            log::warn!("Decoder branch '{}' failed; cancelling siblings", name);
        }
        let _ = job.results.send((index, outcome));
    }
}

fn run_branch(name: &str, session: &InferenceSession, input: &ArrayD<f32>, cancel: &AtomicBool) -> BranchOutcome {
    let input_name = session
        .primary_input()
        .map_err(|e| PipelineError::branch_failed(name, e.to_string()))?;
    let mut inputs = TensorMap::new();
    inputs.insert(input_name.to_string(), input.clone());
    session.run_cancellable(inputs, cancel).map_err(|e| match e {
        AdapterError::Cancelled => PipelineError::BranchCancelled { branch: name.to_string() },
        other => PipelineError::branch_failed(name, other.to_string()),
    })
}

fn merge_outputs(branches: Vec<(&str, TensorMap)>) -> TensorMap {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for (_, outputs) in &branches {
        for key in outputs.keys() {
            *counts.entry(key.as_str()).or_default() += 1;
        }
    }
    let colliding: Vec<String> = counts
        .into_iter()
        .filter(|(_, n)| *n > 1)
        .map(|(k, _)| k.to_string())
        .collect();

    let mut merged = TensorMap::new();
    for (branch, outputs) in branches {
        for (key, tensor) in outputs {
            let key = if colliding.contains(&key) {
                format!("{}/{}", branch, key)
            } else {
                key
            };
            merged.insert(key, tensor);
        }
    }
    merged
}

impl Drop for DecoderPool {
    fn drop(&mut self) {
        for worker in &mut self.workers {
            worker.jobs.take();
        }
        for worker in &mut self.workers {
            if let Some(handle) = worker.handle.take() {
                if handle.join().is_err() {
                    log::error!("Decoder branch '{}' panicked", worker.name);
                }
            }
        }
    }
}

impl std::fmt::Debug for DecoderPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecoderPool")
            .field("branches", &self.branch_names().collect::<Vec<_>>())
            .finish()
    }
}

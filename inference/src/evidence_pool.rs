/// Worker pool that runs evidence handling off the analysis path
/// Anchoring is network-bound, so analysis can move on to the next video
/// while workers upload and record the previous one
use crate::aggregation::Decision;
use crate::error::{AnomalyError, Result};
use crate::evidence::{EvidenceOutcome, EvidencePipeline};
use crate::types::{AlertMetadata, SourceVideo};
use crossbeam::channel::{bounded, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

pub struct EvidenceJob {
    pub decision: Decision,
    pub source: SourceVideo,
    pub metadata: AlertMetadata,
}

enum EvidenceCommand {
    Process {
        job: EvidenceJob,
        response_tx: Sender<Result<EvidenceOutcome>>,
    },
    Shutdown,
}

/// Pending result of a submitted job
pub struct EvidenceTicket {
    video: String,
    response_rx: Receiver<Result<EvidenceOutcome>>,
}

impl EvidenceTicket {
    pub fn video(&self) -> &str {
        &self.video
    }

    /// Block until the worker finishes this job
    pub fn wait(self) -> Result<EvidenceOutcome> {
        self.response_rx
            .recv()
            .map_err(|_| AnomalyError::other(format!("evidence worker dropped job for {}", self.video)))?
    }
}

/// Fixed set of threads pulling from a bounded queue
pub struct EvidencePool {
    command_tx: Sender<EvidenceCommand>,
    workers: Vec<Worker>,
}

impl EvidencePool {
    pub fn new(num_workers: usize, queue_depth: usize, pipeline: Arc<EvidencePipeline>) -> Result<Self> {
        if num_workers == 0 {
            return Err(AnomalyError::config("evidence pool needs at least one worker"));
        }
        let (command_tx, command_rx) = bounded::<EvidenceCommand>(queue_depth.max(1));

        let mut workers = Vec::with_capacity(num_workers);
        for id in 0..num_workers {
            workers.push(Worker::new(id, command_rx.clone(), Arc::clone(&pipeline))?);
        }

        log::info!("Evidence pool started with {} workers (queue depth {})", num_workers, queue_depth.max(1));
        Ok(Self { command_tx, workers })
    }

    /// Queue a job, blocking while the queue is full
    pub fn submit(&self, job: EvidenceJob) -> Result<EvidenceTicket> {
        let (response_tx, response_rx) = bounded(1);
        let video = job.source.name.clone();
        self.command_tx
            .send(EvidenceCommand::Process { job, response_tx })
            .map_err(|_| AnomalyError::other("evidence pool is shut down"))?;
        Ok(EvidenceTicket { video, response_rx })
    }

    /// Jobs waiting for a worker
    pub fn pending(&self) -> usize {
        self.command_tx.len()
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for EvidencePool {
    fn drop(&mut self) {
        // Shutdown is queued behind pending jobs, so accepted work still completes
        for _ in &self.workers {
            let _ = self.command_tx.send(EvidenceCommand::Shutdown);
        }

        for worker in &mut self.workers {
            if let Some(thread) = worker.thread.take() {
                if thread.join().is_err() {
                    log::error!("Evidence worker {} panicked", worker.id);
                }
            }
        }
    }
}

struct Worker {
    id: usize,
    thread: Option<thread::JoinHandle<()>>,
}

impl Worker {
    fn new(id: usize, command_rx: Receiver<EvidenceCommand>, pipeline: Arc<EvidencePipeline>) -> Result<Self> {
        let thread = thread::Builder::new()
            .name(format!("evidence-{}", id))
            .spawn(move || {
                log::debug!("Evidence worker {} started", id);

                while let Ok(command) = command_rx.recv() {
                    match command {
                        EvidenceCommand::Process { job, response_tx } => {
                            let start = Instant::now();
                            let video = job.source.name.clone();
                            let result = pipeline.process(&job.decision, job.source, &job.metadata);
                            log::debug!(
                                "Evidence worker {} finished {} in {:.1}ms",
                                id,
                                video,
                                start.elapsed().as_secs_f32() * 1000.0
                            );
                            if response_tx.send(result).is_err() {
                                log::debug!("Result for {} dropped, submitter went away", video);
                            }
                        }
                        EvidenceCommand::Shutdown => break,
                    }
                }

                log::debug!("Evidence worker {} stopped", id);
            })?;

        Ok(Worker {
            id,
            thread: Some(thread),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::AnchorService;
    use crate::evidence::EvidenceState;
    use crate::store::MemoryAlertStore;
    use crate::types::ContentIdentifier;

    struct InstantAnchor;

    impl AnchorService for InstantAnchor {
        fn anchor(&self, name: &str, _bytes: &[u8]) -> Result<ContentIdentifier> {
            Ok(ContentIdentifier(format!("Qm{}", name)))
        }

        fn gateway_url(&self, cid: &ContentIdentifier) -> String {
            cid.gateway_url("https://gw")
        }
    }

    fn job(name: &str, alert: bool) -> EvidenceJob {
        EvidenceJob {
            decision: Decision {
                alert,
                video_score: if alert { 0.8 } else { 0.2 },
                segment_scores: vec![if alert { 0.8 } else { 0.2 }],
            },
            source: SourceVideo::in_memory(name, vec![0u8; 16]),
            metadata: AlertMetadata::default(),
        }
    }

    #[test]
    fn test_pool_processes_every_job_once() {
        let store = Arc::new(MemoryAlertStore::new());
        let pipeline = Arc::new(EvidencePipeline::new(Arc::new(InstantAnchor), store.clone()));
        let pool = EvidencePool::new(3, 2, pipeline).unwrap();

        let tickets: Vec<EvidenceTicket> = (0..10)
            .map(|i| pool.submit(job(&format!("v{}", i), i % 2 == 0)).unwrap())
            .collect();

        let outcomes: Vec<EvidenceOutcome> = tickets.into_iter().map(|t| t.wait().unwrap()).collect();
        let recorded = outcomes.iter().filter(|o| o.state == EvidenceState::Recorded).count();
        assert_eq!(recorded, 5);
        assert_eq!(store.len(), 5);
    }

    #[test]
    fn test_drop_drains_queued_jobs() {
        let store = Arc::new(MemoryAlertStore::new());
        {
            let pipeline = Arc::new(EvidencePipeline::new(Arc::new(InstantAnchor), store.clone()));
            let pool = EvidencePool::new(1, 4, pipeline).unwrap();
            for i in 0..4 {
                let _ = pool.submit(job(&format!("d{}", i), true)).unwrap();
            }
        }
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let pipeline = Arc::new(EvidencePipeline::new(
            Arc::new(InstantAnchor),
            Arc::new(MemoryAlertStore::new()),
        ));
        assert!(EvidencePool::new(0, 4, pipeline).is_err());
    }
}

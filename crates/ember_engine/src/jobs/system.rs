//! Worker pool and main-thread result draining

use super::{ErasedValue, JobError, JobId, JobInfo, JobOutcome, JobPriority, JobType};
use crate::core::JobConfig;
use crossbeam::channel::{bounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;

type Runnable = Box<dyn FnOnce() -> JobOutcome + Send>;
type Completion<C> = Box<dyn FnOnce(&mut C, JobOutcome)>;

struct QueuedJob {
    id: JobId,
    job_type: JobType,
    run: Runnable,
}

#[derive(Default)]
struct Queues {
    high: VecDeque<QueuedJob>,
    normal: VecDeque<QueuedJob>,
    low: VecDeque<QueuedJob>,
    shutdown: bool,
}

impl Queues {
    fn queue_mut(&mut self, priority: JobPriority) -> &mut VecDeque<QueuedJob> {
        match priority {
            JobPriority::High => &mut self.high,
            JobPriority::Normal => &mut self.normal,
            JobPriority::Low => &mut self.low,
        }
    }

    /// Highest-priority job this worker may run
    fn take_for(&mut self, mask: JobType) -> Option<QueuedJob> {
        for queue in [&mut self.high, &mut self.normal, &mut self.low] {
            if let Some(position) = queue.iter().position(|job| mask.intersects(job.job_type)) {
                return queue.remove(position);
            }
        }
        None
    }

    fn clear(&mut self) -> usize {
        let dropped = self.high.len() + self.normal.len() + self.low.len();
        self.high.clear();
        self.normal.clear();
        self.low.clear();
        dropped
    }
}

struct Shared {
    queues: Mutex<Queues>,
    available: Condvar,
}

/// Thread type masks for `thread_count` workers.
///
/// Every worker accepts general jobs. With a single worker (or a renderer that
/// cannot be driven from more than one thread) worker 0 also takes resource
/// loads and GPU work. With two workers they split those between them. With
/// more, worker 0 is dedicated to GPU work and worker 1 to resource loads.
pub fn default_type_masks(thread_count: usize, renderer_multithreaded: bool) -> Vec<JobType> {
    let mut masks = vec![JobType::GENERAL; thread_count];
    match thread_count {
        0 => {}
        1 => masks[0] |= JobType::GPU_RESOURCE | JobType::RESOURCE_LOAD,
        _ if !renderer_multithreaded => masks[0] |= JobType::GPU_RESOURCE | JobType::RESOURCE_LOAD,
        2 => {
            masks[0] |= JobType::GPU_RESOURCE;
            masks[1] |= JobType::RESOURCE_LOAD;
        }
        _ => {
            masks[0] = JobType::GPU_RESOURCE;
            masks[1] = JobType::RESOURCE_LOAD;
        }
    }
    masks
}

/// Worker pool parameterised over the main-thread context handed to callbacks
pub struct JobSystem<C> {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
    masks: Vec<JobType>,
    results: Option<Receiver<(JobId, JobOutcome)>>,
    completions: HashMap<JobId, Completion<C>>,
    next_id: u64,
}

impl<C: 'static> JobSystem<C> {
    /// Spawn one worker per entry of `type_masks`
    pub fn new(type_masks: &[JobType], result_capacity: usize) -> Result<Self, JobError> {
        if type_masks.is_empty() {
            return Err(JobError::NoWorkers);
        }

        let shared = Arc::new(Shared {
            queues: Mutex::new(Queues::default()),
            available: Condvar::new(),
        });
        let (sender, receiver) = bounded(result_capacity.max(1));

        let mut system = Self {
            shared,
            workers: Vec::with_capacity(type_masks.len()),
            masks: type_masks.to_vec(),
            results: Some(receiver),
            completions: HashMap::new(),
            next_id: 0,
        };

        for (index, &mask) in type_masks.iter().enumerate() {
            let shared = Arc::clone(&system.shared);
            let sender = sender.clone();
            let handle = std::thread::Builder::new()
                .name(format!("job-worker-{index}"))
                .spawn(move || worker_loop(index, mask, &shared, &sender))
                .map_err(|source| JobError::SpawnFailed { index, source })?;
            log::debug!("[JOBS] Worker {} started with mask {:?}", index, mask);
            system.workers.push(handle);
        }

        log::info!("[JOBS] Job system started with {} workers", system.workers.len());
        Ok(system)
    }

    /// Build from configuration using the default thread masks
    pub fn from_config(config: &JobConfig, renderer_multithreaded: bool) -> Result<Self, JobError> {
        let masks = default_type_masks(config.resolved_worker_threads(), renderer_multithreaded);
        Self::new(&masks, config.result_capacity)
    }

    /// Number of worker threads
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Jobs submitted whose callbacks have not run yet
    pub fn outstanding(&self) -> usize {
        self.completions.len()
    }

    /// Queue a job. Its callbacks run during a later [`JobSystem::update`].
    pub fn submit<T, E>(&mut self, info: JobInfo<C, T, E>) -> Result<JobId, JobError>
    where
        T: Send + 'static,
        E: Send + 'static,
    {
        if self.results.is_none() {
            return Err(JobError::ShutDown);
        }
        if !self.masks.iter().any(|mask| mask.intersects(info.job_type)) {
            log::warn!(
                "[JOBS] No worker accepts jobs of type {:?}, job will never run",
                info.job_type
            );
        }

        let id = JobId(self.next_id);
        self.next_id += 1;

        let entry_point = info.entry_point;
        let run: Runnable = Box::new(move || match catch_unwind(AssertUnwindSafe(entry_point)) {
            Ok(Ok(value)) => JobOutcome::Succeeded(Box::new(value)),
            Ok(Err(error)) => JobOutcome::Failed(Box::new(error)),
            Err(_) => JobOutcome::Panicked,
        });

        let on_success = info.on_success;
        let on_fail = info.on_fail;
        let completion: Completion<C> = Box::new(move |context, outcome| match outcome {
            JobOutcome::Succeeded(value) => {
                if let (Some(callback), Some(value)) = (on_success, downcast::<T>(value)) {
                    callback(context, value);
                }
            }
            JobOutcome::Failed(error) => {
                if let (Some(callback), Some(error)) = (on_fail, downcast::<E>(error)) {
                    callback(context, error);
                }
            }
            JobOutcome::Panicked => {
                log::error!("[JOBS] Job {:?} panicked, callbacks dropped", id);
            }
        });
        self.completions.insert(id, completion);

        {
            let mut queues = self.shared.queues.lock();
            queues.queue_mut(info.priority).push_back(QueuedJob {
                id,
                job_type: info.job_type,
                run,
            });
        }
        // Masks differ per worker, so wake everyone and let the right one claim it
        self.shared.available.notify_all();

        log::trace!("[JOBS] Submitted job {:?} ({:?}, {:?})", id, info.job_type, info.priority);
        Ok(id)
    }

    /// Run the callbacks of every finished job on the calling thread.
    ///
    /// Returns the number of completed jobs processed.
    pub fn update(&mut self, context: &mut C) -> usize {
        let Some(results) = &self.results else {
            return 0;
        };
        let finished: Vec<_> = results.try_iter().collect();
        let count = finished.len();

        for (id, outcome) in finished {
            match self.completions.remove(&id) {
                Some(completion) => completion(context, outcome),
                None => log::warn!("[JOBS] Result for unknown job {:?}", id),
            }
        }
        count
    }

    /// Stop all workers. Queued jobs that have not started are dropped.
    pub fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }

        let dropped = {
            let mut queues = self.shared.queues.lock();
            queues.shutdown = true;
            queues.clear()
        };
        self.shared.available.notify_all();

        // Unblocks any worker waiting on a full result channel
        self.results = None;

        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                log::error!("[JOBS] Worker thread panicked during shutdown");
            }
        }
        self.completions.clear();
        log::info!("[JOBS] Job system shut down, {} pending jobs dropped", dropped);
    }
}

impl<C> Drop for JobSystem<C> {
    fn drop(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        self.shared.queues.lock().shutdown = true;
        self.shared.available.notify_all();
        self.results = None;
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn downcast<T: 'static>(value: ErasedValue) -> Option<T> {
    value.downcast::<T>().ok().map(|boxed| *boxed)
}

fn worker_loop(
    index: usize,
    mask: JobType,
    shared: &Shared,
    results: &Sender<(JobId, JobOutcome)>,
) {
    loop {
        let job = {
            let mut queues = shared.queues.lock();
            loop {
                if queues.shutdown {
                    log::debug!("[JOBS] Worker {} exiting", index);
                    return;
                }
                if let Some(job) = queues.take_for(mask) {
                    break job;
                }
                shared.available.wait(&mut queues);
            }
        };

        let id = job.id;
        let outcome = (job.run)();
        if results.send((id, outcome)).is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct Context {
        log: Vec<String>,
    }

    fn pump(jobs: &mut JobSystem<Context>, context: &mut Context, expected: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut done = 0;
        while done < expected {
            done += jobs.update(context);
            assert!(Instant::now() < deadline, "timed out waiting for jobs");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_default_type_masks() {
        assert_eq!(
            default_type_masks(1, true),
            vec![JobType::all()]
        );

        let two = default_type_masks(2, true);
        assert_eq!(two[0], JobType::GENERAL | JobType::GPU_RESOURCE);
        assert_eq!(two[1], JobType::GENERAL | JobType::RESOURCE_LOAD);

        let four = default_type_masks(4, true);
        assert_eq!(four[0], JobType::GPU_RESOURCE);
        assert_eq!(four[1], JobType::RESOURCE_LOAD);
        assert_eq!(four[2], JobType::GENERAL);
        assert_eq!(four[3], JobType::GENERAL);

        let single_context = default_type_masks(4, false);
        assert_eq!(single_context[0], JobType::all());
        assert_eq!(single_context[1], JobType::GENERAL);
    }

    #[test]
    fn test_success_callback_runs_on_update() {
        let mut jobs = JobSystem::<Context>::new(&[JobType::all()], 8).unwrap();
        let mut context = Context::default();

        let info = JobInfo::new(JobType::GENERAL, JobPriority::Normal, || Ok::<u32, String>(21 * 2))
            .on_success(|ctx: &mut Context, value| ctx.log.push(format!("ok {value}")))
            .on_fail(|ctx: &mut Context, error| ctx.log.push(format!("fail {error}")));
        jobs.submit(info).unwrap();

        assert!(context.log.is_empty());
        pump(&mut jobs, &mut context, 1);
        assert_eq!(context.log, vec!["ok 42".to_string()]);
        assert_eq!(jobs.outstanding(), 0);
    }

    #[test]
    fn test_failure_callback_receives_error() {
        let mut jobs = JobSystem::<Context>::new(&[JobType::all()], 8).unwrap();
        let mut context = Context::default();

        let info = JobInfo::new(JobType::RESOURCE_LOAD, JobPriority::High, || {
            Err::<(), String>("missing file".to_string())
        })
        .on_fail(|ctx: &mut Context, error| ctx.log.push(error));
        jobs.submit(info).unwrap();

        pump(&mut jobs, &mut context, 1);
        assert_eq!(context.log, vec!["missing file".to_string()]);
    }

    #[test]
    fn test_jobs_only_run_on_accepting_workers() {
        let masks = [JobType::GENERAL, JobType::RESOURCE_LOAD];
        let mut jobs = JobSystem::<Context>::new(&masks, 8).unwrap();
        let mut context = Context::default();

        for _ in 0..8 {
            let info = JobInfo::new(JobType::RESOURCE_LOAD, JobPriority::Normal, || {
                Ok::<String, ()>(std::thread::current().name().unwrap_or_default().to_string())
            })
            .on_success(|ctx: &mut Context, name| ctx.log.push(name));
            jobs.submit(info).unwrap();
        }

        pump(&mut jobs, &mut context, 8);
        assert!(context.log.iter().all(|name| name == "job-worker-1"));
    }

    #[test]
    fn test_priority_order() {
        let mut jobs = JobSystem::<Context>::new(&[JobType::GENERAL], 8).unwrap();
        let mut context = Context::default();
        let order = Arc::new(Mutex::new(Vec::new()));

        let (started_tx, started_rx) = bounded::<()>(1);
        let (gate_tx, gate_rx) = bounded::<()>(1);
        jobs.submit(JobInfo::new(JobType::GENERAL, JobPriority::Normal, move || {
            let _ = started_tx.send(());
            let _ = gate_rx.recv();
            Ok::<(), ()>(())
        }))
        .unwrap();
        started_rx.recv().unwrap();

        for (priority, label) in [
            (JobPriority::Low, "low"),
            (JobPriority::Normal, "normal"),
            (JobPriority::High, "high"),
        ] {
            let order = Arc::clone(&order);
            jobs.submit(JobInfo::new(JobType::GENERAL, priority, move || {
                order.lock().push(label);
                Ok::<(), ()>(())
            }))
            .unwrap();
        }

        gate_tx.send(()).unwrap();
        pump(&mut jobs, &mut context, 4);
        assert_eq!(*order.lock(), vec!["high", "normal", "low"]);
    }

    #[test]
    fn test_shutdown_drops_pending_jobs() {
        let mut jobs = JobSystem::<Context>::new(&[JobType::GENERAL], 8).unwrap();
        let ran = Arc::new(Mutex::new(0_u32));

        let (started_tx, started_rx) = bounded::<()>(1);
        let (gate_tx, gate_rx) = bounded::<()>(1);
        jobs.submit(JobInfo::new(JobType::GENERAL, JobPriority::Normal, move || {
            let _ = started_tx.send(());
            let _ = gate_rx.recv();
            Ok::<(), ()>(())
        }))
        .unwrap();
        started_rx.recv().unwrap();

        for _ in 0..3 {
            let ran = Arc::clone(&ran);
            jobs.submit(JobInfo::new(JobType::GENERAL, JobPriority::Normal, move || {
                *ran.lock() += 1;
                Ok::<(), ()>(())
            }))
            .unwrap();
        }

        let releaser = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            let _ = gate_tx.send(());
        });
        jobs.shutdown();
        releaser.join().unwrap();

        assert_eq!(*ran.lock(), 0);
        assert_eq!(jobs.worker_count(), 0);
        let late = JobInfo::<Context, (), ()>::new(JobType::GENERAL, JobPriority::Low, || Ok(()));
        assert!(matches!(jobs.submit(late), Err(JobError::ShutDown)));
    }

    #[test]
    fn test_panicking_job_is_reported_without_callbacks() {
        let mut jobs = JobSystem::<Context>::new(&[JobType::GENERAL], 8).unwrap();
        let mut context = Context::default();
        let info = JobInfo::new(JobType::GENERAL, JobPriority::Normal, || -> Result<(), ()> {
            panic!("job exploded")
        })
        .on_success(|ctx: &mut Context, ()| ctx.log.push("ok".into()))
        .on_fail(|ctx: &mut Context, ()| ctx.log.push("fail".into()));
        jobs.submit(info).unwrap();

        pump(&mut jobs, &mut context, 1);
        assert!(context.log.is_empty());
        assert_eq!(jobs.outstanding(), 0);
    }
}

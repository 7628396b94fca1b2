use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use tokio::sync::{mpsc, watch, OwnedSemaphorePermit, Semaphore};

use crate::executor::FrameResolver;
use crate::node::Clip;
use crate::types::Frame;

pub const DEFAULT_BUFFER_SIZE: usize = 8;

/// Called after every written frame with `(written, total)`.
pub type ProgressCallback = Box<dyn Fn(u64, u64) + Send>;

pub trait FrameSink: Send + 'static {
    fn write_frame(&mut self, frame: &Frame) -> Result<()>;
    fn finish(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderSummary {
    pub frames_written: u64,
    pub total_frames: u64,
    pub elapsed: Duration,
    pub cancelled: bool,
}

impl RenderSummary {
    pub fn fps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.frames_written as f64 / secs
        } else {
            0.0
        }
    }
}

/// A computed frame waiting for the writer. The permit is released once the
/// frame has been written, which bounds computed-but-unwritten frames.
struct CompletedFrame {
    index: u64,
    frame: Arc<Frame>,
    _permit: OwnedSemaphorePermit,
}

/// Renders a clip with several frames in flight and writes them in order.
///
/// Workers take a buffer permit before claiming the next frame index, so
/// the lowest unwritten index always holds a permit and is being computed;
/// the writer can therefore always make progress.
pub struct StreamingExecutor {
    workers: usize,
    buffer_size: usize,
}

impl StreamingExecutor {
    pub fn new(workers: usize, buffer_size: usize) -> Self {
        let workers = workers.max(1);
        Self {
            workers,
            buffer_size: buffer_size.max(workers),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub async fn render<S>(
        &self,
        clip: Clip,
        sink: S,
        cancel: watch::Receiver<bool>,
        progress_callback: Option<ProgressCallback>,
    ) -> Result<RenderSummary>
    where
        S: FrameSink,
    {
        let started = Instant::now();
        let total_frames = clip.video_info().num_frames;

        if *cancel.borrow() {
            return Ok(RenderSummary {
                frames_written: 0,
                total_frames,
                elapsed: started.elapsed(),
                cancelled: true,
            });
        }

        let (error_tx, mut error_rx) = mpsc::unbounded_channel::<anyhow::Error>();
        let (cancel_tx, _) = watch::channel(false);
        let cancel_state = Arc::new(AtomicBool::new(false));
        let external_cancelled = Arc::new(AtomicBool::new(false));

        let external_cancel_handle = spawn_external_cancel_watcher(
            cancel,
            cancel_state.clone(),
            external_cancelled.clone(),
            cancel_tx.clone(),
        );

        let semaphore = Arc::new(Semaphore::new(self.buffer_size));
        let next_index = Arc::new(AtomicU64::new(0));
        let (done_tx, done_rx) = mpsc::unbounded_channel::<CompletedFrame>();

        let worker_count = (self.workers as u64).min(total_frames.max(1)) as usize;
        let mut worker_handles = Vec::with_capacity(worker_count);
        for worker in 0..worker_count {
            worker_handles.push(spawn_worker(
                worker,
                clip.clone(),
                total_frames,
                semaphore.clone(),
                next_index.clone(),
                done_tx.clone(),
                cancel_tx.subscribe(),
                cancel_state.clone(),
                cancel_tx.clone(),
                error_tx.clone(),
            ));
        }
        drop(done_tx);

        let writer_handle = spawn_writer(
            sink,
            done_rx,
            total_frames,
            progress_callback,
            cancel_state.clone(),
            cancel_tx.clone(),
            error_tx.clone(),
        );
        drop(error_tx);

        let mut first_error: Option<anyhow::Error> = None;

        for handle in worker_handles {
            if let Err(join_error) = handle.await {
                signal_cancel(&cancel_state, &cancel_tx);
                if first_error.is_none() {
                    first_error = Some(anyhow!("render worker panicked: {join_error}"));
                }
            }
        }

        let frames_written = match writer_handle.await {
            Ok(written) => written,
            Err(join_error) => {
                signal_cancel(&cancel_state, &cancel_tx);
                if first_error.is_none() {
                    first_error = Some(anyhow!("render writer panicked: {join_error}"));
                }
                0
            }
        };

        while let Some(error) = error_rx.recv().await {
            if first_error.is_none() {
                first_error = Some(error);
            }
        }

        signal_cancel(&cancel_state, &cancel_tx);
        external_cancel_handle.abort();
        if let Err(join_error) = external_cancel_handle.await {
            if !join_error.is_cancelled() && first_error.is_none() {
                first_error = Some(anyhow!("external cancel watcher failed: {join_error}"));
            }
        }

        if let Some(error) = first_error {
            return Err(error);
        }

        let summary = RenderSummary {
            frames_written,
            total_frames,
            elapsed: started.elapsed(),
            cancelled: external_cancelled.load(Ordering::SeqCst) && frames_written < total_frames,
        };
        tracing::info!(
            frames = summary.frames_written,
            total_frames,
            workers = worker_count,
            buffer_size = self.buffer_size,
            elapsed_ms = format!("{:.0}", summary.elapsed.as_secs_f64() * 1000.0),
            fps = format!("{:.2}", summary.fps()),
            cancelled = summary.cancelled,
            "Render finished"
        );

        Ok(summary)
    }
}

impl Default for StreamingExecutor {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::new(workers, DEFAULT_BUFFER_SIZE)
    }
}

fn spawn_external_cancel_watcher(
    mut cancel: watch::Receiver<bool>,
    cancel_state: Arc<AtomicBool>,
    external_cancelled: Arc<AtomicBool>,
    cancel_tx: watch::Sender<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if cancel.wait_for(|cancelled| *cancelled).await.is_ok() {
            external_cancelled.store(true, Ordering::SeqCst);
            signal_cancel(&cancel_state, &cancel_tx);
        }
    })
}

#[allow(clippy::too_many_arguments)]
fn spawn_worker(
    worker: usize,
    clip: Clip,
    total_frames: u64,
    semaphore: Arc<Semaphore>,
    next_index: Arc<AtomicU64>,
    output: mpsc::UnboundedSender<CompletedFrame>,
    mut cancel_rx: watch::Receiver<bool>,
    cancel_state: Arc<AtomicBool>,
    cancel_tx: watch::Sender<bool>,
    error_tx: mpsc::UnboundedSender<anyhow::Error>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let resolver = FrameResolver::new();
        let mut frame_count = 0_u64;
        let mut total_wait_ms = 0.0_f64;
        let mut total_compute_ms = 0.0_f64;

        loop {
            if cancel_state.load(Ordering::SeqCst) {
                break;
            }

            let t_wait = Instant::now();
            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = cancel_rx.wait_for(|cancelled| *cancelled) => break,
            };
            total_wait_ms += t_wait.elapsed().as_secs_f64() * 1000.0;

            let index = next_index.fetch_add(1, Ordering::SeqCst);
            if index >= total_frames {
                break;
            }

            let t_compute = Instant::now();
            let task_clip = clip.clone();
            let result =
                tokio::task::spawn_blocking(move || resolver.get_frame(&task_clip, index)).await;
            total_compute_ms += t_compute.elapsed().as_secs_f64() * 1000.0;

            let frame = match result {
                Ok(Ok(frame)) => frame,
                Ok(Err(error)) => {
                    report_task_error(
                        &error_tx,
                        &cancel_state,
                        &cancel_tx,
                        error.context(format!("failed to render frame {index}")),
                    );
                    break;
                }
                Err(join_error) => {
                    report_task_error(
                        &error_tx,
                        &cancel_state,
                        &cancel_tx,
                        anyhow!("frame {index} computation panicked: {join_error}"),
                    );
                    break;
                }
            };

            let completed = CompletedFrame {
                index,
                frame,
                _permit: permit,
            };
            if output.send(completed).is_err() {
                break;
            }
            frame_count += 1;
        }

        if frame_count > 0 {
            tracing::debug!(
                worker,
                frames = frame_count,
                avg_permit_wait_ms = format!("{:.1}", total_wait_ms / frame_count as f64),
                avg_compute_ms = format!("{:.1}", total_compute_ms / frame_count as f64),
                total_compute_ms = format!("{:.0}", total_compute_ms),
                "Worker summary"
            );
        }
    })
}

fn spawn_writer<S>(
    mut sink: S,
    input: mpsc::UnboundedReceiver<CompletedFrame>,
    total_frames: u64,
    progress_callback: Option<ProgressCallback>,
    cancel_state: Arc<AtomicBool>,
    cancel_tx: watch::Sender<bool>,
    error_tx: mpsc::UnboundedSender<anyhow::Error>,
) -> tokio::task::JoinHandle<u64>
where
    S: FrameSink,
{
    tokio::task::spawn_blocking(move || {
        let result = run_writer_loop(
            &mut sink,
            input,
            total_frames,
            progress_callback,
            cancel_state.clone(),
        );

        match result {
            Ok(written) => {
                if let Err(error) = sink.finish().context("sink finish failed") {
                    report_task_error(
                        &error_tx,
                        &cancel_state,
                        &cancel_tx,
                        error.context("writer stage failed while finalizing"),
                    );
                }
                written
            }
            Err((written, error)) => {
                report_task_error(
                    &error_tx,
                    &cancel_state,
                    &cancel_tx,
                    error.context("writer stage failed"),
                );
                written
            }
        }
    })
}

fn run_writer_loop<S>(
    sink: &mut S,
    mut input: mpsc::UnboundedReceiver<CompletedFrame>,
    total_frames: u64,
    progress_callback: Option<ProgressCallback>,
    cancel_state: Arc<AtomicBool>,
) -> std::result::Result<u64, (u64, anyhow::Error)>
where
    S: FrameSink,
{
    let mut pending: BTreeMap<u64, CompletedFrame> = BTreeMap::new();
    let mut written = 0_u64;
    let mut max_pending = 0_usize;
    let mut total_recv_ms = 0.0_f64;
    let mut total_write_ms = 0.0_f64;

    while written < total_frames {
        if cancel_state.load(Ordering::SeqCst) {
            break;
        }

        let t_recv = Instant::now();
        let Some(completed) = input.blocking_recv() else {
            break;
        };
        total_recv_ms += t_recv.elapsed().as_secs_f64() * 1000.0;
        pending.insert(completed.index, completed);
        max_pending = max_pending.max(pending.len());

        while let Some(completed) = pending.remove(&written) {
            let t_write = Instant::now();
            sink.write_frame(&completed.frame)
                .with_context(|| format!("failed to write frame {}", completed.index))
                .map_err(|error| (written, error))?;
            total_write_ms += t_write.elapsed().as_secs_f64() * 1000.0;
            written += 1;
            drop(completed);

            if let Some(callback) = progress_callback.as_ref() {
                callback(written, total_frames);
            }
        }
    }

    if written > 0 {
        tracing::info!(
            frames = written,
            max_reorder_buffer = max_pending,
            avg_recv_wait_ms = format!("{:.1}", total_recv_ms / written as f64),
            avg_write_ms = format!("{:.1}", total_write_ms / written as f64),
            total_write_ms = format!("{:.0}", total_write_ms),
            "Writer stage summary"
        );
    }

    Ok(written)
}

fn signal_cancel(cancel_state: &Arc<AtomicBool>, cancel_tx: &watch::Sender<bool>) {
    cancel_state.store(true, Ordering::SeqCst);
    let _ = cancel_tx.send(true);
}

fn report_task_error(
    error_tx: &mpsc::UnboundedSender<anyhow::Error>,
    cancel_state: &Arc<AtomicBool>,
    cancel_tx: &watch::Sender<bool>,
    error: anyhow::Error,
) {
    signal_cancel(cancel_state, cancel_tx);
    let _ = error_tx.send(error);
}

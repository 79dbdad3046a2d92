//! The streamer engine: single-threaded, multi-threaded, and forked modes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use tracing::debug;

use crate::worker::Worker;
use crate::{
    fill_buffer, PositionedStreamSource, Result, SourceBytes, StreamSink, StreamSource,
};

/// Buffer budget for the multi-threaded streamer. Buffers are allocated
/// lazily, up to the configured counts.
#[derive(Clone, Copy, Debug)]
pub struct MultiThreadedOptions {
    pub num_buffers: usize,
    pub bytes_per_buffer: usize,
    /// Buffer budget for the secondary queue in forked mode.
    pub num_buffers_secondary: usize,
}

impl Default for MultiThreadedOptions {
    fn default() -> Self {
        Self {
            num_buffers: 4,
            bytes_per_buffer: 1 << 20,
            num_buffers_secondary: 4,
        }
    }
}

#[derive(Clone, Debug)]
enum Mode {
    SingleThreaded { buffer_bytes: usize },
    MultiThreaded(MultiThreadedOptions),
}

/// Moves bytes from a source into one or two sinks.
///
/// The single-threaded variant alternates reads and sink writes through one
/// buffer. The multi-threaded variant runs the source on a worker thread and
/// the sink on the caller's thread, with owned buffers cycling through a pair
/// of bounded FIFO queues.
#[derive(Clone, Debug)]
pub struct Streamer {
    mode: Mode,
}

/// Verdict returned by the `primary_done` callback of a forked stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SecondaryStreamDecision {
    /// Stop the secondary sink as soon as possible; remaining buffered bytes
    /// are not flushed.
    Abandon,
    /// Stream the remainder of the source to the secondary sink, restarting
    /// from the position where it first fell behind.
    Finish,
}

/// Arguments for [`Streamer::forked_stream`].
///
/// The source is read once and every chunk goes to the primary sink; each
/// chunk is also copied to the secondary sink iff doing so would not block.
/// Once the primary sink has consumed the whole stream, `primary_done` is
/// invoked with the primary sink and decides whether the secondary output is
/// completed or abandoned.
pub struct ForkedStream<'a, P: StreamSink + Send> {
    pub source: &'a mut dyn PositionedStreamSource,
    pub primary_sink: &'a mut P,
    pub secondary_sink: &'a mut (dyn StreamSink + Send),
    pub primary_done: Box<dyn FnOnce(&mut P) -> SecondaryStreamDecision + Send + 'a>,
    pub primary_progress: &'a mut (dyn FnMut(u64) + Send),
    pub secondary_progress: &'a mut (dyn FnMut(u64) + Send),
}

struct Chunk {
    buf: Vec<u8>,
    len: usize,
    end: bool,
}

impl Chunk {
    fn end_marker() -> Self {
        Chunk {
            buf: Vec::new(),
            len: 0,
            end: true,
        }
    }
}

/// Progress callbacks share one lock so observers see a total order over
/// callback invocations.
struct ProgressCallbacks<'a> {
    primary: &'a mut (dyn FnMut(u64) + Send),
    secondary: &'a mut (dyn FnMut(u64) + Send),
}

impl Streamer {
    pub fn single_threaded(buffer_bytes: usize) -> Self {
        Self {
            mode: Mode::SingleThreaded { buffer_bytes },
        }
    }

    pub fn multi_threaded(options: MultiThreadedOptions) -> Self {
        Self {
            mode: Mode::MultiThreaded(options),
        }
    }

    /// Stream bytes from `source` to `sink` until the former is exhausted.
    pub fn stream(
        &self,
        source: &mut (dyn StreamSource + Send),
        sink: &mut dyn StreamSink,
    ) -> Result<()> {
        self.stream_with_progress(source, sink, &mut |_| {})
    }

    /// Like [`Streamer::stream`], invoking `progress` for each chunk handed
    /// to the sink.
    pub fn stream_with_progress(
        &self,
        source: &mut (dyn StreamSource + Send),
        sink: &mut dyn StreamSink,
        progress: &mut dyn FnMut(u64),
    ) -> Result<()> {
        match self.mode {
            Mode::SingleThreaded { buffer_bytes } => {
                let mut buffer = vec![0u8; buffer_bytes];
                loop {
                    match source.get_bytes(&mut buffer)? {
                        SourceBytes::Copied(n) => {
                            sink.add_bytes(&buffer[..n])?;
                            progress(n as u64);
                        }
                        SourceBytes::End => return Ok(()),
                    }
                }
            }
            Mode::MultiThreaded(options) => stream_multi(options, source, sink, progress),
        }
    }

    /// Stream `source` to a primary and, opportunistically, a secondary sink.
    /// See [`ForkedStream`] for the contract.
    pub fn forked_stream<P: StreamSink + Send>(&self, stream: ForkedStream<'_, P>) -> Result<()> {
        match self.mode {
            Mode::SingleThreaded { buffer_bytes } => forked_sequential(buffer_bytes, stream),
            Mode::MultiThreaded(options) => forked_multi(options, stream),
        }
    }
}

/// Take a free buffer, blocking if the budget is exhausted and none has been
/// returned yet. `None` means the other side of the queue hung up.
fn next_buffer(
    free: &Receiver<Vec<u8>>,
    allocated: &mut usize,
    budget: usize,
    bytes_per_buffer: usize,
) -> Option<Vec<u8>> {
    match free.try_recv() {
        Ok(buf) => Some(buf),
        Err(TryRecvError::Empty) if *allocated < budget => {
            *allocated += 1;
            Some(vec![0u8; bytes_per_buffer])
        }
        Err(TryRecvError::Empty) => free.recv().ok(),
        Err(TryRecvError::Disconnected) => None,
    }
}

/// Non-blocking variant of [`next_buffer`].
fn try_next_buffer(
    free: &Receiver<Vec<u8>>,
    allocated: &mut usize,
    budget: usize,
    bytes_per_buffer: usize,
) -> Option<Vec<u8>> {
    match free.try_recv() {
        Ok(buf) => Some(buf),
        Err(TryRecvError::Empty) if *allocated < budget => {
            *allocated += 1;
            Some(vec![0u8; bytes_per_buffer])
        }
        _ => None,
    }
}

fn stream_multi(
    options: MultiThreadedOptions,
    source: &mut (dyn StreamSource + Send),
    sink: &mut dyn StreamSink,
    progress: &mut dyn FnMut(u64),
) -> Result<()> {
    let mut source_result: Result<()> = Ok(());
    let mut sink_result: Result<()> = Ok(());
    thread::scope(|scope| {
        let worker = Worker::new(scope);
        let (free_tx, free_rx) = bounded::<Vec<u8>>(options.num_buffers);
        let (full_tx, full_rx) = bounded::<Chunk>(options.num_buffers);
        {
            let source_result = &mut source_result;
            worker.run(move || {
                *source_result = run_source(source, options, &free_rx, &full_tx);
            });
        }
        sink_result = (|| -> Result<()> {
            loop {
                // A hangup means the source hit an error; it surfaces below.
                let chunk = match full_rx.recv() {
                    Ok(chunk) => chunk,
                    Err(_) => return Ok(()),
                };
                sink.add_bytes(&chunk.buf[..chunk.len])?;
                progress(chunk.len as u64);
                let end = chunk.end;
                let _ = free_tx.send(chunk.buf);
                if end {
                    return Ok(());
                }
            }
        })();
    });
    source_result?;
    sink_result
}

fn run_source(
    source: &mut (dyn StreamSource + Send),
    options: MultiThreadedOptions,
    free: &Receiver<Vec<u8>>,
    full: &Sender<Chunk>,
) -> Result<()> {
    let mut allocated = 0;
    loop {
        let mut buf = match next_buffer(free, &mut allocated, options.num_buffers, options.bytes_per_buffer) {
            Some(buf) => buf,
            None => return Ok(()),
        };
        let fill = fill_buffer(source, &mut buf)?;
        let end = fill.end;
        if full
            .send(Chunk {
                buf,
                len: fill.num_bytes,
                end,
            })
            .is_err()
        {
            return Ok(());
        }
        if end {
            return Ok(());
        }
    }
}

fn forked_sequential<P: StreamSink + Send>(
    buffer_bytes: usize,
    stream: ForkedStream<'_, P>,
) -> Result<()> {
    let ForkedStream {
        source,
        primary_sink,
        secondary_sink,
        primary_done,
        primary_progress,
        secondary_progress,
    } = stream;
    let mut buffer = vec![0u8; buffer_bytes];
    loop {
        match source.get_bytes(&mut buffer)? {
            SourceBytes::Copied(n) => {
                primary_sink.add_bytes(&buffer[..n])?;
                primary_progress(n as u64);
                secondary_sink.add_bytes(&buffer[..n])?;
                secondary_progress(n as u64);
            }
            SourceBytes::End => break,
        }
    }
    // Sequential streaming never falls behind, so the decision has no
    // bytes left to schedule either way.
    let decision = primary_done(primary_sink);
    debug!("sequential forked stream done, decision {:?}", decision);
    Ok(())
}

fn forked_multi<P: StreamSink + Send>(
    options: MultiThreadedOptions,
    stream: ForkedStream<'_, P>,
) -> Result<()> {
    let ForkedStream {
        source,
        primary_sink,
        secondary_sink,
        primary_done,
        primary_progress,
        secondary_progress,
    } = stream;

    let abort = AtomicBool::new(false);
    let progress = Mutex::new(ProgressCallbacks {
        primary: primary_progress,
        secondary: secondary_progress,
    });
    let mut primary_result: Result<()> = Ok(());
    let mut secondary_result: Result<()> = Ok(());
    let mut drive_result: Result<()> = Ok(());

    thread::scope(|scope| {
        let primary_worker = Worker::new(scope);
        let secondary_worker = Worker::new(scope);

        let (p_free_tx, p_free_rx) = bounded::<Vec<u8>>(options.num_buffers);
        let (p_full_tx, p_full_rx) = bounded::<Chunk>(options.num_buffers);
        let (s_free_tx, s_free_rx) = bounded::<Vec<u8>>(options.num_buffers_secondary);
        let (s_full_tx, s_full_rx) = bounded::<Chunk>(options.num_buffers_secondary);
        let (decision_tx, decision_rx) = bounded::<SecondaryStreamDecision>(1);

        {
            let progress = &progress;
            let primary_result = &mut primary_result;
            primary_worker.run(move || {
                *primary_result = (|| -> Result<()> {
                    loop {
                        let chunk = match p_full_rx.recv() {
                            Ok(chunk) => chunk,
                            Err(_) => return Ok(()),
                        };
                        primary_sink.add_bytes(&chunk.buf[..chunk.len])?;
                        {
                            let mut callbacks = progress.lock().unwrap();
                            (callbacks.primary)(chunk.len as u64);
                        }
                        let end = chunk.end;
                        let _ = p_free_tx.send(chunk.buf);
                        if end {
                            break;
                        }
                    }
                    let _ = decision_tx.send(primary_done(primary_sink));
                    Ok(())
                })();
            });
        }

        {
            let abort = &abort;
            let progress = &progress;
            let secondary_result = &mut secondary_result;
            secondary_worker.run(move || {
                *secondary_result = (|| -> Result<()> {
                    loop {
                        if abort.load(Ordering::Acquire) {
                            return Ok(());
                        }
                        let chunk = match s_full_rx.recv() {
                            Ok(chunk) => chunk,
                            Err(_) => return Ok(()),
                        };
                        if abort.load(Ordering::Acquire) {
                            return Ok(());
                        }
                        secondary_sink.add_bytes(&chunk.buf[..chunk.len])?;
                        {
                            let mut callbacks = progress.lock().unwrap();
                            (callbacks.secondary)(chunk.len as u64);
                        }
                        let end = chunk.end;
                        let _ = s_free_tx.send(chunk.buf);
                        if end {
                            return Ok(());
                        }
                    }
                })();
            });
        }

        drive_result = (|| -> Result<()> {
            let mut p_allocated = 0;
            let mut s_allocated = 0;
            let start_pos = source.position()?;
            let mut bytes_streamed: u64 = 0;
            let mut fell_behind_at: Option<u64> = None;
            let mut end_reached_secondary = false;
            loop {
                // A primary hangup means the primary sink failed; that error
                // surfaces through `primary_result` after the scope joins.
                let mut buf = match next_buffer(
                    &p_free_rx,
                    &mut p_allocated,
                    options.num_buffers,
                    options.bytes_per_buffer,
                ) {
                    Some(buf) => buf,
                    None => return Ok(()),
                };
                let fill = fill_buffer(source, &mut buf)?;
                if fell_behind_at.is_none() {
                    match try_next_buffer(
                        &s_free_rx,
                        &mut s_allocated,
                        options.num_buffers_secondary,
                        options.bytes_per_buffer,
                    ) {
                        Some(mut sbuf) => {
                            sbuf[..fill.num_bytes].copy_from_slice(&buf[..fill.num_bytes]);
                            let sent = s_full_tx
                                .send(Chunk {
                                    buf: sbuf,
                                    len: fill.num_bytes,
                                    end: fill.end,
                                })
                                .is_ok();
                            if sent && fill.end {
                                end_reached_secondary = true;
                            }
                        }
                        None => {
                            debug!(
                                "secondary queue fell behind at byte {}; suspending the tee",
                                bytes_streamed
                            );
                            fell_behind_at = Some(bytes_streamed);
                        }
                    }
                }
                bytes_streamed += fill.num_bytes as u64;
                let end = fill.end;
                if p_full_tx
                    .send(Chunk {
                        buf,
                        len: fill.num_bytes,
                        end,
                    })
                    .is_err()
                {
                    return Ok(());
                }
                if end {
                    break;
                }
            }

            // The primary sink has everything; wait for its verdict.
            let decision = match decision_rx.recv() {
                Ok(decision) => decision,
                Err(_) => return Ok(()),
            };
            match decision {
                SecondaryStreamDecision::Abandon => {
                    debug!("abandoning secondary stream after {} bytes", bytes_streamed);
                    abort.store(true, Ordering::Release);
                    // Unblock the secondary if it is parked on an empty queue.
                    let _ = s_full_tx.try_send(Chunk::end_marker());
                }
                SecondaryStreamDecision::Finish => {
                    if let Some(restart) = fell_behind_at {
                        debug!("restarting source at byte {} to catch the secondary up", restart);
                        source.set_position(start_pos + restart)?;
                        loop {
                            let mut sbuf = match next_buffer(
                                &s_free_rx,
                                &mut s_allocated,
                                options.num_buffers_secondary,
                                options.bytes_per_buffer,
                            ) {
                                Some(buf) => buf,
                                None => return Ok(()),
                            };
                            let fill = fill_buffer(source, &mut sbuf)?;
                            let end = fill.end;
                            if s_full_tx
                                .send(Chunk {
                                    buf: sbuf,
                                    len: fill.num_bytes,
                                    end,
                                })
                                .is_err()
                            {
                                return Ok(());
                            }
                            if end {
                                break;
                            }
                        }
                        debug!("secondary stream caught up");
                    } else if !end_reached_secondary {
                        let _ = s_full_tx.send(Chunk::end_marker());
                    }
                }
            }
            Ok(())
        })();
    });

    drive_result?;
    primary_result?;
    secondary_result
}

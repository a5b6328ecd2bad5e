//! Output sinks for formatted records.
//!
//! Every sink owns a bounded queue drained by its own worker thread. File and
//! console sinks are lossy under backpressure: a full queue increments a
//! discard counter, surfaced as a throttled sentinel record. The replay sink
//! blocks instead (see [`replay`]).

pub mod file;
pub mod replay;
pub mod sse;

use std::io::Write;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Sender, TrySendError};

/// Minimum spacing between "Discarded" sentinel records.
const DISCARD_NOTE_PERIOD: Duration = Duration::from_secs(10);

/// A destination for formatted records.
pub trait Sink: Send + Sync {
    /// Delivers one record. `count_discards` is set for real records and clear
    /// for sentinels, which are not worth discard accounting.
    fn send(&self, msg: &str, count_discards: bool);

    /// Flushes and shuts down the sink, blocking until drained.
    fn close(&self);
}

/// Fan-out to every configured sink.
#[derive(Default)]
pub struct Senders {
    sinks: Vec<Box<dyn Sink>>,
}

impl Senders {
    pub fn new() -> Self {
        Senders::default()
    }

    pub fn push(&mut self, sink: Box<dyn Sink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl Sink for Senders {
    fn send(&self, msg: &str, count_discards: bool) {
        for sink in &self.sinks {
            sink.send(msg, count_discards);
        }
    }

    fn close(&self) {
        for sink in &self.sinks {
            sink.close();
        }
    }
}

/// A lossy queued sink writing to any `Write` target from a worker thread.
pub struct QueueSink {
    name: String,
    tx: Mutex<Option<Sender<String>>>,
    discarded: AtomicU32,
    last_note: Mutex<Instant>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl QueueSink {
    /// Spawns the worker draining the queue into `writer`.
    pub fn new(name: &str, out_chan_size: usize, mut writer: Box<dyn Write + Send>) -> Self {
        let (tx, rx) = bounded::<String>(out_chan_size);
        let thread_name = format!("sink-{}", name);
        let worker = std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                for msg in rx.iter() {
                    if let Err(err) = writer.write_all(msg.as_bytes()) {
                        log::error!("sink write failed: {}", err);
                    }
                }
                if let Err(err) = writer.flush() {
                    log::error!("sink flush failed: {}", err);
                }
            })
            .expect("spawn sink worker");
        QueueSink {
            name: name.to_owned(),
            tx: Mutex::new(Some(tx)),
            discarded: AtomicU32::new(0),
            last_note: Mutex::new(
                Instant::now()
                    .checked_sub(DISCARD_NOTE_PERIOD)
                    .unwrap_or_else(Instant::now),
            ),
            worker: Mutex::new(Some(worker)),
        }
    }

    pub fn discarded(&self) -> u32 {
        self.discarded.load(Ordering::Relaxed)
    }

    fn try_send(&self, msg: String) -> Result<(), TrySendError<String>> {
        match self.tx.lock().unwrap().as_ref() {
            Some(tx) => tx.try_send(msg),
            None => Ok(()),
        }
    }
}

impl Sink for QueueSink {
    fn send(&self, msg: &str, count_discards: bool) {
        match self.try_send(msg.to_owned()) {
            Ok(()) => {}
            Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(_)) => {
                if !count_discards {
                    return;
                }
                let discarded = self.discarded.fetch_add(1, Ordering::Relaxed) + 1;
                let mut last_note = self.last_note.lock().unwrap();
                if last_note.elapsed() >= DISCARD_NOTE_PERIOD {
                    *last_note = Instant::now();
                    let _ = self.try_send(format!("\n Discarded: {}\n", discarded));
                }
            }
        }
    }

    fn close(&self) {
        let discarded = self.discarded();
        if discarded > 0 {
            let _ = self.try_send(format!("\n#{} discarded", discarded));
        }
        // dropping the sender ends the worker's drain loop
        *self.tx.lock().unwrap() = None;
        if let Some(worker) = self.worker.lock().unwrap().take() {
            if worker.join().is_err() {
                log::error!("sink {} worker panicked", self.name);
            }
        }
    }
}

/// Builds the sink for one `--output` target.
pub fn create_sink(
    spec: &str,
    out_chan_size: usize,
    cancel: crate::runtime::CancelToken,
    options: &crate::config::Options,
) -> anyhow::Result<Box<dyn Sink>> {
    if spec == "stdout" || spec.starts_with("stdout:") {
        return Ok(Box::new(QueueSink::new(
            "stdout",
            out_chan_size,
            Box::new(std::io::stdout()),
        )));
    }
    if spec == "stderr" {
        return Ok(Box::new(QueueSink::new(
            "stderr",
            out_chan_size,
            Box::new(std::io::stderr()),
        )));
    }
    if spec.starts_with("http://") || spec.starts_with("https://") {
        return Ok(Box::new(replay::ReplaySink::start(
            spec,
            out_chan_size,
            cancel,
            &options.method,
            &options.verbose,
        )?));
    }
    let (path, max_size, append) = file::parse_output_spec(spec);
    let writer = file::RotateWriter::new(&path, max_size, append);
    Ok(Box::new(QueueSink::new(&path, out_chan_size, Box::new(writer))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex as StdMutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<StdMutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn queue_sink_writes_and_drains_on_close() {
        let buf = SharedBuf::default();
        let sink = QueueSink::new("test", 8, Box::new(buf.clone()));
        sink.send("one\n", true);
        sink.send("two\n", true);
        sink.close();
        assert_eq!(&*buf.0.lock().unwrap(), b"one\ntwo\n");
    }

    #[test]
    fn discards_are_counted_when_queue_is_full() {
        // a writer that blocks forever would be flaky; use capacity 1 with a
        // worker held up by a slow first write
        struct Slow(SharedBuf);
        impl Write for Slow {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                std::thread::sleep(std::time::Duration::from_millis(50));
                self.0.write(buf)
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }
        let buf = SharedBuf::default();
        let sink = QueueSink::new("slow", 1, Box::new(Slow(buf.clone())));
        for _ in 0..20 {
            sink.send("x", true);
        }
        // sentinels don't count
        sink.send("sentinel", false);
        assert!(sink.discarded() > 0);
        sink.close();
    }
}

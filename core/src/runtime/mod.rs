//! Process runtime.
//!
//! Wires the capture source into the assembler, runs the idle-eviction tick,
//! fans records out to the configured sinks, and coordinates cancellation
//! (ctrl-c or a drained record quota) with a short drain grace period.

use crate::capture;
use crate::config::{Mode, Options};
use crate::conntrack::{AssemblerConfig, ConnectionHandler, TcpAssembler};
use crate::filter::{Policy, RateLimiter};
use crate::handler::pair::PairConnectionHandler;
use crate::handler::HttpConnectionHandler;
use crate::sink::{self, replay, sse, Senders, Sink};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use crossbeam_channel::{bounded, select, tick, Receiver, Sender};

/// Seconds between idle-eviction sweeps.
const FLUSH_PERIOD: Duration = Duration::from_secs(10);
/// Drain grace after cancellation.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// A cloneable cancellation token: a flag for polling plus a channel that
/// becomes ready (closed) on cancel, usable in `select!`.
#[derive(Clone, Debug)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug)]
struct CancelInner {
    flag: AtomicBool,
    tx: Mutex<Option<Sender<()>>>,
    rx: Receiver<()>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = bounded::<()>(0);
        CancelToken {
            inner: Arc::new(CancelInner {
                flag: AtomicBool::new(false),
                tx: Mutex::new(Some(tx)),
                rx,
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        // dropping the sender closes the channel, waking every waiter
        self.inner.tx.lock().unwrap().take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Channel that errors out of `recv` once cancelled.
    pub fn cancelled(&self) -> Receiver<()> {
        self.inner.rx.clone()
    }

    /// Blocks until cancelled.
    pub fn wait(&self) {
        let _ = self.inner.rx.recv();
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        CancelToken::new()
    }
}

/// The assembled process: capture → pipeline → sinks.
pub struct Runtime {
    options: Options,
    cancel: CancelToken,
}

impl Runtime {
    /// Validates options and installs the signal handler.
    pub fn new(options: Options) -> Result<Self> {
        let cancel = CancelToken::new();
        let handler_token = cancel.clone();
        ctrlc::set_handler(move || {
            log::info!("interrupt received, shutting down");
            handler_token.cancel();
        })
        .context("install signal handler")?;
        Ok(Runtime { options, cancel })
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn build_policy(&self) -> Result<Arc<Policy>> {
        let options = &self.options;
        let (dump_prefix, dump_max) = options.dump_body_parts();
        let policy = Policy {
            host: options.host.clone(),
            uri: options.uri.clone(),
            method: options.method.clone(),
            status: options.status.clone(),
            level: options.level,
            dump_body: dump_prefix,
            dump_max,
            resp: options.resp,
            force: options.force,
            curl: options.curl,
            json: options.json,
            eof: options.eof,
            rate_limiter: (options.rate > 0.0)
                .then(|| RateLimiter::new(options.rate, options.rate.max(1.0))),
            n: options.n,
            src_ratio: options.src_ratio,
            cancel: Some(self.cancel.clone()),
            ..Default::default()
        };
        policy.reset_quota();
        Ok(Arc::new(policy))
    }

    fn build_sinks(&self) -> Result<Arc<Senders>> {
        let options = &self.options;
        let mut senders = Senders::new();

        let outputs: Vec<String> = if options.output.is_empty() {
            vec!["stdout".to_owned()]
        } else {
            options.output.clone()
        };
        for spec in &outputs {
            let sink = sink::create_sink(spec, options.out_chan_size, self.cancel.clone(), options)
                .with_context(|| format!("create output {}", spec))?;
            senders.push(sink);
        }

        if options.web {
            let stream = sse::SseStream::new();
            let port = sse::serve(Arc::clone(&stream), options.web_port, &options.web_context)?;
            log::info!("transactions at http://127.0.0.1:{}/", port);
            senders.push(Box::new(sse::SseSink::new(stream)));
        }

        Ok(Arc::new(senders))
    }

    /// Runs until the capture ends or the process is cancelled.
    pub fn run(&self) -> Result<()> {
        let policy = self.build_policy()?;
        let senders = self.build_sinks()?;

        // replay-only mode: feed saved record files straight to the sinks
        if !self.options.file.is_empty() {
            let result = replay::follow_files(&self.options.file, senders.as_ref(), &self.cancel);
            self.cancel.cancel();
            std::thread::sleep(SHUTDOWN_GRACE);
            senders.close();
            return result;
        }

        let handler: Box<dyn ConnectionHandler> = match self.options.mode {
            Mode::Fast => Box::new(HttpConnectionHandler::new(policy, Arc::clone(&senders))),
            Mode::Pair => Box::new(PairConnectionHandler::new(policy, Arc::clone(&senders))),
        };
        let assembler = Arc::new(TcpAssembler::new(
            handler,
            AssemblerConfig {
                chan_size: self.options.chan_size,
                parse_response: self.options.resp,
                filter_ip: self.options.ip_list()?,
                filter_port: self.options.port_list()?,
            },
        ));

        let packets = capture::create_packet_channel(&self.options, &self.cancel)?;
        let idle = chrono::Duration::seconds(self.options.idle as i64);
        let cancel = self.cancel.clone();
        let loop_assembler = Arc::clone(&assembler);
        let pipeline = std::thread::Builder::new()
            .name("pipeline".to_owned())
            .spawn(move || {
                loop_packets(packets, loop_assembler, idle, cancel.clone());
                // capture drained (offline end) or cancelled either way
                cancel.cancel();
            })
            .context("spawn pipeline thread")?;

        self.cancel.wait();
        log::info!("draining for {:?} before exit", SHUTDOWN_GRACE);
        std::thread::sleep(SHUTDOWN_GRACE);
        let _ = pipeline.join();
        senders.close();
        Ok(())
    }
}

/// Dispatches packets into the assembler and evicts idle connections on a
/// fixed tick.
fn loop_packets(
    packets: Receiver<capture::PacketFrame>,
    assembler: Arc<TcpAssembler<Box<dyn ConnectionHandler>>>,
    idle: chrono::Duration,
    cancel: CancelToken,
) {
    let ticker = tick(FLUSH_PERIOD);
    let cancelled = cancel.cancelled();
    loop {
        select! {
            recv(packets) -> frame => match frame {
                Ok(frame) => assembler.assemble(&frame.data, frame.ts),
                Err(_) => break, // end of capture
            },
            recv(ticker) -> _ => {
                assembler.flush_older_than(Utc::now() - idle);
            }
            recv(cancelled) -> _ => break,
        }
    }
    assembler.finish_all();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_wakes_waiters() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        let waiter = token.clone();
        let handle = std::thread::spawn(move || {
            waiter.wait();
            waiter.is_cancelled()
        });
        std::thread::sleep(Duration::from_millis(20));
        token.cancel();
        assert!(handle.join().unwrap());
        // idempotent
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancelled_channel_is_selectable() {
        let token = CancelToken::new();
        let rx = token.cancelled();
        token.cancel();
        assert!(rx.recv().is_err());
    }
}

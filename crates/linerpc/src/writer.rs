//! The writer pump: a single background thread that serializes every
//! outbound frame (spec §4.H).
//!
//! Grounded on `arti-rpc-client-core::llconn::Writer` for the actual
//! line-write, composed here with an `mpsc` channel playing the role of the
//! spec's FIFO work queue — the same shape as a typical Rust "actor thread"
//! (one `Sender` cloned into every producer, one `Receiver` owned by the
//! pump loop), which is how this corpus's background-worker code is
//! consistently built.

use std::io::Write;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use tracing::{debug, warn};

use crate::framer;

enum WorkItem {
    Write(String),
    Abort(Arc<AbortSignal>),
}

#[derive(Default)]
struct AbortSignal {
    done: Mutex<bool>,
    condvar: Condvar,
}

impl AbortSignal {
    fn signal(&self) {
        *self.done.lock().expect("abort signal poisoned") = true;
        self.condvar.notify_all();
    }

    fn wait_timeout(&self, timeout: std::time::Duration) -> bool {
        let guard = self.done.lock().expect("abort signal poisoned");
        let (guard, _) = self
            .condvar
            .wait_timeout_while(guard, timeout, |done| !*done)
            .expect("abort signal poisoned");
        *guard
    }
}

/// A handle to the background writer thread. Cloning and sending through
/// [`WriterPump::enqueue`] is the only producer-facing surface; the pump
/// itself drains its queue on a dedicated thread started by
/// [`WriterPump::spawn`].
pub struct WriterPump {
    tx: Sender<WorkItem>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl WriterPump {
    /// Start the pump thread, writing framed lines to `sink` as they are
    /// enqueued.
    pub fn spawn<W: Write + Send + 'static>(sink: W) -> Arc<Self> {
        let (tx, rx) = mpsc::channel::<WorkItem>();
        let mut writer = framer::Writer::new(sink);
        let handle = std::thread::Builder::new()
            .name("linerpc-writer".into())
            .spawn(move || {
                for item in rx {
                    match item {
                        WorkItem::Write(line) => {
                            if let Err(e) = writer.write_line(&line) {
                                warn!(error = %e, "writer pump failed to send a frame");
                            } else {
                                debug!(bytes = line.len(), "writer pump sent a frame");
                            }
                        }
                        WorkItem::Abort(signal) => {
                            signal.signal();
                            break;
                        }
                    }
                }
            })
            .expect("failed to spawn writer pump thread");
        Arc::new(WriterPump {
            tx,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Enqueue a line for the pump to write. Fire-and-forget: returns
    /// immediately regardless of queue depth (spec §4.H: "there is no
    /// producer-visible backpressure beyond queue growth"). Silently
    /// no-ops if the pump has already been aborted.
    pub fn enqueue(&self, line: String) {
        let _ = self.tx.send(WorkItem::Write(line));
    }

    /// Enqueue an abort, wait up to `grace` for the pump to acknowledge it
    /// and exit, then join the thread. Idempotent: a second call observes
    /// the channel already closed and returns immediately.
    pub fn shutdown(&self, grace: std::time::Duration) {
        let signal = Arc::new(AbortSignal::default());
        if self.tx.send(WorkItem::Abort(signal.clone())).is_ok() {
            signal.wait_timeout(grace);
        }
        if let Some(handle) = self.handle.lock().expect("writer pump handle poisoned").take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel as test_channel;

    struct RecordingSink(Sender<String>);
    impl Write for RecordingSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let _ = self.0.send(String::from_utf8_lossy(buf).into_owned());
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn writes_are_delivered_in_enqueue_order() {
        let (tx, rx) = test_channel();
        let pump = WriterPump::spawn(RecordingSink(tx));
        pump.enqueue("A".into());
        pump.enqueue("B".into());
        pump.enqueue("C".into());
        pump.shutdown(std::time::Duration::from_secs(1));

        let received: String = rx.try_iter().collect();
        assert_eq!(received, "A\nB\nC\n");
    }

    #[test]
    fn shutdown_is_idempotent() {
        let (tx, _rx) = test_channel();
        let pump = WriterPump::spawn(RecordingSink(tx));
        pump.shutdown(std::time::Duration::from_secs(1));
        pump.shutdown(std::time::Duration::from_secs(1));
    }
}

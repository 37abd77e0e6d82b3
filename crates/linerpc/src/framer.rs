//! Newline-delimited framing over a byte stream (spec §4.A).
//!
//! Grounded on `arti-rpc-client-core::llconn`'s `Reader`/`Writer` split: a
//! buffered reader that accumulates bytes until a frame delimiter appears,
//! and a writer that appends the delimiter and drains fully before
//! returning. Unlike `llconn` (which frames on `UnparsedResponse` and feeds
//! the JSON parser directly), this framer's job stops at "one line of
//! bytes" — decoding is [`crate::codec`]'s concern.

use std::io::{self, BufRead, Write};

use tracing::warn;

use crate::error::FramerError;

/// A one-shot hook a [`Reader`] calls the first time it sees a transient
/// would-block/timed-out error, so the underlying socket's read timeout can
/// be escalated before retrying (spec §4.A: "it escalates the socket timeout
/// to 5 s and retries"). Fires at most once per `Reader`; after that, further
/// would-block errors just retry against whatever timeout is already in
/// effect.
pub type EscalateTimeout = Box<dyn FnMut() + Send>;

/// Reads newline-delimited frames from a buffered byte source.
///
/// `R` is anything implementing [`BufRead`]; callers wrap a raw socket in
/// `std::io::BufReader` to get one. Using `BufRead` rather than reimplementing
/// the 2 KiB-chunk accumulation loop from the reference by hand keeps this
/// module a thin policy layer over what the standard library already does
/// well, while preserving the same observable behavior: read until `\n`,
/// return the line with the delimiter stripped, report EOF distinctly from
/// a clean read.
pub struct Reader<R> {
    inner: R,
    escalate: Option<EscalateTimeout>,
    escalated: bool,
}

impl<R: BufRead> Reader<R> {
    /// Wrap an existing buffered reader with no timeout-escalation hook.
    pub fn new(inner: R) -> Self {
        Reader { inner, escalate: None, escalated: false }
    }

    /// Wrap an existing buffered reader, calling `escalate` the first time a
    /// transient would-block/timed-out error is observed (spec §4.A).
    pub fn with_escalation(inner: R, escalate: Option<EscalateTimeout>) -> Self {
        Reader { inner, escalate, escalated: false }
    }

    /// Access the underlying buffered reader, e.g. to peek at already
    /// buffered bytes without blocking on the socket (spec §9 open
    /// question (b)).
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Read one frame, stripping the trailing `\n` (and a preceding `\r`,
    /// tolerated but not required).
    ///
    /// Returns `Ok(None)` on a clean peer close with no partial data
    /// buffered. Returns [`FramerError::Eof`] if the peer closed mid-frame or
    /// hit one of the enumerated connection-fatal socket errors (spec §4.A),
    /// carrying the count of bytes that were read but never terminated.
    /// Transient would-block/timed-out errors escalate the read timeout (see
    /// [`Reader::with_escalation`]) and retry; any other socket error is
    /// logged and retried without disturbing the buffer, matching spec
    /// §4.A's "other socket errors return an empty frame without disturbing
    /// the buffer" (here: keep accumulating rather than surface a spurious
    /// empty line).
    pub fn read_frame(&mut self) -> Result<Option<String>, FramerError> {
        let mut buf = Vec::new();
        loop {
            let n = match self.inner.read_until(b'\n', &mut buf) {
                Ok(n) => n,
                Err(e) => match classify_io_error(&e) {
                    IoOutcome::Fatal => return Err(FramerError::Eof(buf.len())),
                    IoOutcome::Transient => {
                        if !self.escalated {
                            self.escalated = true;
                            if let Some(escalate) = &mut self.escalate {
                                escalate();
                            }
                        }
                        continue;
                    }
                    IoOutcome::Other => {
                        warn!(error = %e, "socket error reading a frame; retrying");
                        continue;
                    }
                },
            };
            if n == 0 {
                // Clean EOF from the underlying reader.
                if buf.is_empty() {
                    return Ok(None);
                }
                return Err(FramerError::Eof(buf.len()));
            }
            if buf.last() == Some(&b'\n') {
                buf.pop();
                if buf.last() == Some(&b'\r') {
                    buf.pop();
                }
                let s = std::str::from_utf8(&buf)
                    .map_err(|e| FramerError::InvalidUtf8(std::sync::Arc::new(e)))?;
                return Ok(Some(s.to_owned()));
            }
            // `read_until` only returns early (without the delimiter) at
            // true EOF, which the `n == 0` branch above already caught on
            // the *next* call; keep looping to accumulate the rest of the
            // line in the meantime.
        }
    }
}

enum IoOutcome {
    /// One of spec §4.A's enumerated connection-fatal kinds.
    Fatal,
    /// `WouldBlock`/`TimedOut` against a socket with a read timeout set —
    /// spec §4.A's "transient socket errors".
    Transient,
    /// Anything else: logged, retried, buffer untouched.
    Other,
}

fn classify_io_error(err: &io::Error) -> IoOutcome {
    if is_connection_fatal(err) {
        IoOutcome::Fatal
    } else if matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) {
        IoOutcome::Transient
    } else {
        IoOutcome::Other
    }
}

/// Writes newline-delimited frames to a byte sink, one at a time.
///
/// Grounded on `llconn::Writer::send_valid`: append the delimiter, then
/// drain completely before returning. The serialization-across-producers
/// guarantee (spec §4.H) is [`crate::writer`]'s job, not this type's — a
/// `Writer` here is meant to be owned exclusively by the writer pump thread.
pub struct Writer<W> {
    inner: W,
}

impl<W: Write> Writer<W> {
    /// Wrap an existing byte sink.
    pub fn new(inner: W) -> Self {
        Writer { inner }
    }

    /// Write one line, appending `\n`. `line` must not contain an embedded
    /// newline; spec §4.A states this as a precondition, and we enforce it
    /// rather than silently truncating or splitting.
    pub fn write_line(&mut self, line: &str) -> Result<(), FramerError> {
        if line.contains('\n') {
            return Err(FramerError::EmbeddedNewline);
        }
        self.inner.write_all(line.as_bytes())?;
        self.inner.write_all(b"\n")?;
        self.inner.flush()?;
        Ok(())
    }
}

/// Classify a raw I/O error the way spec §4.A's socket-error table does,
/// for code that talks to a non-blocking socket directly rather than
/// through a `BufRead` adaptor (the demo's listener, for instance).
pub fn is_connection_fatal(err: &io::Error) -> bool {
    use io::ErrorKind::*;
    matches!(
        err.kind(),
        ConnectionAborted | ConnectionRefused | ConnectionReset | NotConnected | BrokenPipe
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::Arc;

    #[test]
    fn reads_multiple_frames_in_order() {
        let data = b"one\ntwo\nthree\n".to_vec();
        let mut r = Reader::new(Cursor::new(data));
        assert_eq!(r.read_frame().unwrap().as_deref(), Some("one"));
        assert_eq!(r.read_frame().unwrap().as_deref(), Some("two"));
        assert_eq!(r.read_frame().unwrap().as_deref(), Some("three"));
        assert_eq!(r.read_frame().unwrap(), None);
    }

    #[test]
    fn clean_eof_with_no_partial_data_is_none() {
        let mut r = Reader::new(Cursor::new(Vec::new()));
        assert_eq!(r.read_frame().unwrap(), None);
    }

    #[test]
    fn eof_mid_frame_reports_unconsumed_bytes() {
        let mut r = Reader::new(Cursor::new(b"partial".to_vec()));
        let err = r.read_frame().unwrap_err();
        match err {
            FramerError::Eof(n) => assert_eq!(n, 7),
            other => panic!("expected Eof, got {other:?}"),
        }
    }

    #[test]
    fn write_appends_newline() {
        let mut buf = Vec::new();
        {
            let mut w = Writer::new(&mut buf);
            w.write_line("hello").unwrap();
        }
        assert_eq!(buf, b"hello\n");
    }

    #[test]
    fn write_rejects_embedded_newline() {
        let mut buf = Vec::new();
        let mut w = Writer::new(&mut buf);
        let err = w.write_line("a\nb").unwrap_err();
        assert!(matches!(err, FramerError::EmbeddedNewline));
    }

    #[test]
    fn byte_at_a_time_reassembles_frames() {
        let data = b"alpha\nbeta\n".to_vec();
        // Feed the reader a BufReader wrapping a source that only ever
        // yields one byte per `read()`, to exercise the accumulation loop.
        struct OneByte(std::vec::IntoIter<u8>);
        impl std::io::Read for OneByte {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                match self.0.next() {
                    Some(b) => {
                        buf[0] = b;
                        Ok(1)
                    }
                    None => Ok(0),
                }
            }
        }
        let src = std::io::BufReader::new(OneByte(data.into_iter()));
        let mut r = Reader::new(src);
        assert_eq!(r.read_frame().unwrap().as_deref(), Some("alpha"));
        assert_eq!(r.read_frame().unwrap().as_deref(), Some("beta"));
        assert_eq!(r.read_frame().unwrap(), None);
    }

    /// A source that fails a fixed number of times with a given error kind
    /// before finally yielding real bytes, for exercising the transient and
    /// other-error retry paths without a real socket.
    struct Flaky {
        fail_kind: io::ErrorKind,
        fails_remaining: usize,
        data: std::vec::IntoIter<u8>,
    }
    impl std::io::Read for Flaky {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.fails_remaining > 0 {
                self.fails_remaining -= 1;
                return Err(io::Error::from(self.fail_kind));
            }
            match self.data.next() {
                Some(b) => {
                    buf[0] = b;
                    Ok(1)
                }
                None => Ok(0),
            }
        }
    }

    #[test]
    fn transient_would_block_escalates_once_and_retries_without_losing_bytes() {
        let src = std::io::BufReader::new(Flaky {
            fail_kind: io::ErrorKind::WouldBlock,
            fails_remaining: 3,
            data: b"hello\n".to_vec().into_iter(),
        });
        let escalations = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let escalations_clone = escalations.clone();
        let mut r = Reader::with_escalation(
            src,
            Some(Box::new(move || {
                escalations_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            })),
        );
        assert_eq!(r.read_frame().unwrap().as_deref(), Some("hello"));
        assert_eq!(escalations.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn other_socket_errors_are_retried_without_disturbing_the_buffer() {
        // `Interrupted` is already retried inside `BufRead::read_until`
        // itself, so pick a kind that isn't, to actually exercise our own
        // "Other" retry branch in `classify_io_error`.
        let src = std::io::BufReader::new(Flaky {
            fail_kind: io::ErrorKind::Other,
            fails_remaining: 2,
            data: b"still-here\n".to_vec().into_iter(),
        });
        let mut r = Reader::new(src);
        assert_eq!(r.read_frame().unwrap().as_deref(), Some("still-here"));
    }

    #[test]
    fn connection_fatal_io_error_reports_eof() {
        let src = std::io::BufReader::new(Flaky {
            fail_kind: io::ErrorKind::ConnectionReset,
            fails_remaining: 1,
            data: b"unused\n".to_vec().into_iter(),
        });
        let mut r = Reader::new(src);
        let err = r.read_frame().unwrap_err();
        assert!(matches!(err, FramerError::Eof(0)));
    }
}

//! Line-oriented reading source.
//!
//! Turns any newline-terminated byte stream (rtl_433 stdout, a serial device,
//! a captured file) into a channel of [`Reading`]s. Each line is decoded on its
//! own; bad lines are reported and skipped. The channel closes when the stream
//! does.

use crate::reading::Reading;
use crate::sensor::SensorKey;
use log::{debug, info, warn};
use std::io;
use strum::IntoStaticStr;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Default number of back-to-back read errors tolerated before giving up.
pub const DEFAULT_MAX_CONSECUTIVE_ERRORS: u32 = 16;

/// Non-fatal events reported by the pipeline.
#[derive(Debug, Clone, PartialEq, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Diagnostic {
    /// Reading from the stream failed; the source keeps going.
    Transport(String),
    /// A line could not be decoded into a reading.
    Decode { line: String, error: String },
    /// The stream ended. Sent once, as the last diagnostic of a source.
    SourceClosed { reason: String },
    /// A reading arrived for a key that was not discovered.
    UnknownSensor(SensorKey),
}

impl Diagnostic {
    /// Short label for logs and counters.
    pub fn kind(&self) -> &'static str {
        self.into()
    }
}

pub type DiagnosticSender = mpsc::UnboundedSender<Diagnostic>;

/// Send a diagnostic if anyone is listening.
pub(crate) fn report(diagnostics: Option<&DiagnosticSender>, diagnostic: Diagnostic) {
    if let Some(tx) = diagnostics {
        // A dropped receiver only means nobody is collecting diagnostics
        let _ = tx.send(diagnostic);
    }
}

fn is_closed(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
    )
}

/// Producer of readings from a buffered byte stream.
pub struct ReadingSource<R> {
    reader: R,
    diagnostics: Option<DiagnosticSender>,
    max_consecutive_errors: u32,
}

impl<R> ReadingSource<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            diagnostics: None,
            max_consecutive_errors: DEFAULT_MAX_CONSECUTIVE_ERRORS,
        }
    }

    /// Report transport and decode problems on `tx` as well as the log.
    pub fn with_diagnostics(mut self, tx: DiagnosticSender) -> Self {
        self.diagnostics = Some(tx);
        self
    }

    pub fn with_max_consecutive_errors(mut self, max: u32) -> Self {
        self.max_consecutive_errors = max;
        self
    }

    /// Spawn the producer task.
    ///
    /// `capacity` bounds the channel. A full channel stalls the producer
    /// instead of dropping readings.
    pub fn spawn(self, capacity: usize) -> (mpsc::Receiver<Reading>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(self.run(tx));
        (rx, handle)
    }

    /// Read lines until the stream ends or every receiver is gone.
    pub async fn run(mut self, tx: mpsc::Sender<Reading>) {
        let mut buf = Vec::with_capacity(512);
        let mut consecutive_errors = 0u32;
        let mut forwarded = 0u64;

        loop {
            buf.clear();
            match self.reader.read_until(b'\n', &mut buf).await {
                Ok(0) => {
                    self.close("end of input");
                    break;
                }
                Ok(_) => {
                    consecutive_errors = 0;
                    let line = buf.trim_ascii();
                    if line.is_empty() {
                        continue;
                    }
                    match Reading::from_json_line(line) {
                        Ok(reading) => {
                            if tx.send(reading).await.is_err() {
                                debug!("[Source] Reading channel closed, stopping");
                                break;
                            }
                            forwarded += 1;
                        }
                        Err(e) => {
                            let line = String::from_utf8_lossy(line).into_owned();
                            warn!("[Source] Skipping malformed record: {} ({})", e, line);
                            report(
                                self.diagnostics.as_ref(),
                                Diagnostic::Decode {
                                    line,
                                    error: e.to_string(),
                                },
                            );
                        }
                    }
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
                    ) =>
                {
                    continue;
                }
                Err(e) if is_closed(&e) => {
                    self.close(&e.to_string());
                    break;
                }
                Err(e) => {
                    consecutive_errors += 1;
                    warn!("[Source] Read error: {}", e);
                    report(self.diagnostics.as_ref(), Diagnostic::Transport(e.to_string()));
                    if consecutive_errors > self.max_consecutive_errors {
                        self.close(&format!("{} consecutive read errors", consecutive_errors));
                        break;
                    }
                }
            }
        }

        debug!("[Source] Forwarded {} readings", forwarded);
    }

    fn close(&self, reason: &str) {
        info!("[Source] Input closed: {}", reason);
        report(
            self.diagnostics.as_ref(),
            Diagnostic::SourceClosed {
                reason: reason.to_string(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncRead, BufReader, ReadBuf};
    use tokio_test::io::Builder;

    /// Fails with `WouldBlock` a number of times before serving `data`.
    struct WouldBlockReader {
        blocks: usize,
        data: &'static [u8],
    }

    impl AsyncRead for WouldBlockReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if self.blocks > 0 {
                self.blocks -= 1;
                return Poll::Ready(Err(io::ErrorKind::WouldBlock.into()));
            }
            let n = self.data.len().min(buf.remaining());
            buf.put_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Poll::Ready(Ok(()))
        }
    }

    fn collect(rx: &mut mpsc::UnboundedReceiver<Diagnostic>) -> Vec<Diagnostic> {
        let mut out = Vec::new();
        while let Ok(d) = rx.try_recv() {
            out.push(d);
        }
        out
    }

    #[tokio::test]
    async fn test_malformed_lines_are_skipped() {
        let mock = Builder::new()
            .read(b"{\"id\": 1, \"channel\": 1, \"temperature_F\": 32.0}\n")
            .read(b"not json\n")
            .read(b"\n")
            .read(b"{\"id\": 2, \"channel\": 1, \"temperature_F\": 212.0}\n")
            .build();
        let (diag_tx, mut diag_rx) = mpsc::unbounded_channel();

        let (mut rx, handle) = ReadingSource::new(BufReader::new(mock))
            .with_diagnostics(diag_tx)
            .spawn(8);

        assert_eq!(rx.recv().await.unwrap().device_id(), 1);
        assert_eq!(rx.recv().await.unwrap().device_id(), 2);
        assert!(rx.recv().await.is_none());
        handle.await.unwrap();

        let diagnostics = collect(&mut diag_rx);
        assert_eq!(diagnostics.len(), 2);
        assert!(matches!(&diagnostics[0], Diagnostic::Decode { line, .. } if line == "not json"));
        assert_eq!(diagnostics[1].kind(), "source_closed");
    }

    #[tokio::test]
    async fn test_transport_error_is_retried() {
        let mock = Builder::new()
            .read_error(io::Error::other("flaky device"))
            .read(b"{\"id\": 7, \"channel\": 3, \"temperature_F\": 50.0}\n")
            .build();
        let (diag_tx, mut diag_rx) = mpsc::unbounded_channel();

        let (mut rx, handle) = ReadingSource::new(BufReader::new(mock))
            .with_diagnostics(diag_tx)
            .spawn(8);

        assert_eq!(rx.recv().await.unwrap().channel(), 3);
        assert!(rx.recv().await.is_none());
        handle.await.unwrap();

        let kinds: Vec<_> = collect(&mut diag_rx).iter().map(Diagnostic::kind).collect();
        assert_eq!(kinds, ["transport", "source_closed"]);
    }

    #[tokio::test]
    async fn test_would_block_is_retried_silently() {
        let reader = WouldBlockReader {
            blocks: 5,
            data: b"{\"id\": 7, \"channel\": 3, \"temperature_F\": 50.0}\n",
        };
        let (diag_tx, mut diag_rx) = mpsc::unbounded_channel();

        let (mut rx, handle) = ReadingSource::new(BufReader::new(reader))
            .with_diagnostics(diag_tx)
            .with_max_consecutive_errors(2)
            .spawn(8);

        assert_eq!(rx.recv().await.unwrap().device_id(), 7);
        assert!(rx.recv().await.is_none());
        handle.await.unwrap();

        let kinds: Vec<_> = collect(&mut diag_rx).iter().map(Diagnostic::kind).collect();
        assert_eq!(kinds, ["source_closed"]);
    }

    #[tokio::test]
    async fn test_closed_stream_ends_sequence() {
        let mock = Builder::new()
            .read(b"{\"id\": 7, \"channel\": 3, \"temperature_F\": 50.0}\n")
            .read_error(io::Error::from(io::ErrorKind::BrokenPipe))
            .build();
        let (diag_tx, mut diag_rx) = mpsc::unbounded_channel();

        let (mut rx, handle) = ReadingSource::new(BufReader::new(mock))
            .with_diagnostics(diag_tx)
            .spawn(8);

        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
        handle.await.unwrap();

        let diagnostics = collect(&mut diag_rx);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind(), "source_closed");
    }

    #[tokio::test]
    async fn test_repeated_errors_close_source() {
        let mock = Builder::new()
            .read_error(io::Error::other("e1"))
            .read_error(io::Error::other("e2"))
            .read_error(io::Error::other("e3"))
            .build();
        let (diag_tx, mut diag_rx) = mpsc::unbounded_channel();

        let (mut rx, handle) = ReadingSource::new(BufReader::new(mock))
            .with_diagnostics(diag_tx)
            .with_max_consecutive_errors(2)
            .spawn(8);

        assert!(rx.recv().await.is_none());
        handle.await.unwrap();

        let kinds: Vec<_> = collect(&mut diag_rx).iter().map(Diagnostic::kind).collect();
        assert_eq!(kinds, ["transport", "transport", "transport", "source_closed"]);
    }

    #[tokio::test]
    async fn test_last_line_without_newline() {
        let mock = Builder::new()
            .read(b"{\"id\": 4, \"channel\": 1, \"temperature_F\": 41.0}")
            .build();

        let (mut rx, handle) = ReadingSource::new(BufReader::new(mock)).spawn(1);
        assert_eq!(rx.recv().await.unwrap().device_id(), 4);
        assert!(rx.recv().await.is_none());
        handle.await.unwrap();
    }
}

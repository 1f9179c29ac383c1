use crate::error::Result;
use crate::llm::{ByteStream, ResponseRecord};
use futures::{Stream, StreamExt};
use tracing::{debug, warn};

/// Turns a chunked generate body into `ResponseRecord`s, one complete line at a time.
///
/// One decoder per HTTP call. Lines that are not valid records are logged and skipped;
/// the sequence ends at the first `done` record or when the body closes.
pub struct StreamDecoder {
    body: ByteStream,
    /// Bytes received but not yet terminated by a newline
    buffer: Vec<u8>,
    finished: bool,
    skipped: usize,
}

impl StreamDecoder {
    pub fn new(body: ByteStream) -> Self {
        Self {
            body,
            buffer: Vec::new(),
            finished: false,
            skipped: 0,
        }
    }

    /// Next decoded record, `None` once the sequence is over.
    ///
    /// A transport error ends the sequence: it is returned once and every later call
    /// yields `None`.
    pub async fn next_record(&mut self) -> Option<Result<ResponseRecord>> {
        if self.finished {
            return None;
        }

        loop {
            // Process complete lines
            while let Some(newline_pos) = self.buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
                if let Some(record) = self.decode_line(&line) {
                    if record.done {
                        self.finish();
                    }
                    return Some(Ok(record));
                }
            }

            match self.body.next().await {
                Some(Ok(chunk)) => self.buffer.extend_from_slice(&chunk),
                Some(Err(err)) => {
                    self.finished = true;
                    return Some(Err(err));
                }
                None => {
                    if !self.buffer.iter().all(u8::is_ascii_whitespace) {
                        debug!(
                            bytes = self.buffer.len(),
                            "discarding unterminated trailing line"
                        );
                    }
                    self.finished = true;
                    return None;
                }
            }
        }
    }

    /// Number of lines dropped as malformed so far.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Adapt into a `futures::Stream` of records.
    pub fn into_stream(self) -> impl Stream<Item = Result<ResponseRecord>> + Send {
        futures::stream::unfold(self, |mut decoder| async move {
            let item = decoder.next_record().await?;
            Some((item, decoder))
        })
    }

    fn decode_line(&mut self, line: &[u8]) -> Option<ResponseRecord> {
        let line = line.trim_ascii();
        if line.is_empty() {
            return None;
        }

        match serde_json::from_slice::<ResponseRecord>(line) {
            Ok(record) => Some(record),
            Err(err) => {
                self.skipped += 1;
                warn!(
                    error = %err,
                    line = %String::from_utf8_lossy(line),
                    "skipping malformed stream line"
                );
                None
            }
        }
    }

    fn finish(&mut self) {
        self.finished = true;
        if !self.buffer.is_empty() {
            debug!(bytes = self.buffer.len(), "ignoring bytes after final record");
            self.buffer.clear();
        }
    }
}

//! Streamed step execution

use std::collections::VecDeque;

use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use shipwright_core::dto::step::{StepFrame, StepRequest};

use crate::error::{ClientError, Result};
use crate::{AgentClient, check_status};

impl AgentClient {
    // =============================================================================
    // Step Execution
    // =============================================================================

    /// Start a step on the agent
    ///
    /// The agent answers with a newline-delimited stream of frames: log events
    /// and heartbeats while the step runs, then a single terminal `result` or
    /// `error` frame. Pull frames with [`StepStream::next_frame`].
    ///
    /// # Errors
    /// Returns an error if the request cannot be sent or the agent rejects it
    /// before streaming starts.
    pub async fn run_step(&self, request: &StepRequest) -> Result<StepStream> {
        let url = format!("{}/steps/run", self.base_url);
        tracing::debug!(job_id = %request.job_id, step = %request.step, "Starting step on {}", self.base_url);
        let response = self.client.post(&url).json(request).send().await?;
        let response = check_status(response).await?;

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
            .boxed();

        Ok(StepStream::new(body))
    }
}

/// Incremental NDJSON decoder for step frames
///
/// Bytes arrive in arbitrary chunks; complete lines are decoded as soon as
/// their newline is seen and partial lines are kept for the next chunk.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every frame it completed
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<StepFrame>> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(frame) = decode_line(&line)? {
                frames.push(frame);
            }
        }

        Ok(frames)
    }

    /// Decode whatever is left once the byte stream has ended
    pub fn finish(&mut self) -> Result<Option<StepFrame>> {
        let rest = std::mem::take(&mut self.buffer);
        decode_line(&rest)
    }
}

fn decode_line(line: &[u8]) -> Result<Option<StepFrame>> {
    let text = std::str::from_utf8(line)
        .map_err(|e| ClientError::ParseError(format!("Step frame is not UTF-8: {}", e)))?
        .trim();

    if text.is_empty() {
        return Ok(None);
    }

    serde_json::from_str(text)
        .map(Some)
        .map_err(|e| ClientError::ParseError(format!("Invalid step frame: {}", e)))
}

/// Live frames of one running step
pub struct StepStream {
    body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    decoder: FrameDecoder,
    pending: VecDeque<StepFrame>,
    finished: bool,
}

impl StepStream {
    pub fn new(body: BoxStream<'static, reqwest::Result<Vec<u8>>>) -> Self {
        Self {
            body,
            decoder: FrameDecoder::new(),
            pending: VecDeque::new(),
            finished: false,
        }
    }

    /// Next frame, or `None` once the terminal frame has been returned.
    ///
    /// A body that ends (or breaks) before its terminal frame yields
    /// [`ClientError::StreamClosed`], which callers treat as transient.
    pub async fn next_frame(&mut self) -> Result<Option<StepFrame>> {
        loop {
            if self.finished {
                return Ok(None);
            }

            if let Some(frame) = self.pending.pop_front() {
                if frame.is_terminal() {
                    self.finished = true;
                }
                return Ok(Some(frame));
            }

            match self.body.next().await {
                Some(Ok(chunk)) => {
                    self.pending.extend(self.decoder.push(&chunk)?);
                }
                Some(Err(e)) => {
                    self.finished = true;
                    return Err(ClientError::StreamClosed(e.to_string()));
                }
                None => {
                    if let Some(frame) = self.decoder.finish()? {
                        self.pending.push_back(frame);
                        continue;
                    }
                    self.finished = true;
                    return Err(ClientError::StreamClosed(
                        "step stream ended without a result".to_string(),
                    ));
                }
            }
        }
    }
}

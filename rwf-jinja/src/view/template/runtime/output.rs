use super::ChunkStream;
use crate::view::template::Error;

use futures::StreamExt;

/// Collects rendered chunks into the final string.
///
/// Large outputs are appended to one buffer allocated upfront, small
/// ones are kept as a list of chunks and joined once at the end.
#[derive(Debug)]
pub enum Output {
    Buffer(String),
    Chunks(Vec<String>),
}

impl Default for Output {
    fn default() -> Self {
        Output::Chunks(vec![])
    }
}

impl Output {
    /// Pick the strategy from the expected size of the output.
    pub fn with_estimate(estimated: usize, threshold: usize) -> Self {
        if estimated > threshold {
            Output::Buffer(String::with_capacity(estimated))
        } else {
            Output::default()
        }
    }

    pub fn is_buffered(&self) -> bool {
        matches!(self, Output::Buffer(_))
    }

    pub fn write(&mut self, chunk: String) {
        match self {
            Output::Buffer(buffer) => buffer.push_str(&chunk),
            Output::Chunks(chunks) => chunks.push(chunk),
        }
    }

    pub fn finish(self) -> String {
        match self {
            Output::Buffer(buffer) => buffer,
            Output::Chunks(chunks) => chunks.concat(),
        }
    }

    /// Drain the stream. Output produced before an error is discarded.
    pub async fn collect(mut self, mut stream: ChunkStream<'_>) -> Result<String, Error> {
        while let Some(chunk) = stream.next().await {
            self.write(chunk?);
        }

        Ok(self.finish())
    }
}

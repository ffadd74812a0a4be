use async_stream::try_stream;
use futures::StreamExt;

use super::{chunks, execute, ChunkStream, Context, Scope};
use crate::view::template::{compiler::Code, Error};

use std::sync::Arc;

/// Render function of one block of one template.
///
/// Calling it produces the block's output lazily, chunk by chunk.
#[derive(Clone)]
pub struct BlockFn {
    code: Arc<Code>,
    name: Arc<str>,
}

impl std::fmt::Debug for BlockFn {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "BlockFn({}:{})", self.code.name, self.name)
    }
}

impl BlockFn {
    pub fn new(code: Arc<Code>, name: &str) -> Self {
        Self {
            code,
            name: Arc::from(name),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Template that defines this block.
    pub fn template_name(&self) -> &str {
        &self.code.name
    }

    pub fn call<'a>(&'a self, context: &'a Context) -> ChunkStream<'a> {
        chunks(try_stream! {
            let body = self
                .code
                .blocks
                .get(self.name())
                .ok_or_else(|| Error::block_not_found(self.name(), self.template_name()))?;

            let mut scope = Scope::default();
            let mut stream = execute(&self.code.name, body, context, &mut scope);

            while let Some(chunk) = stream.next().await {
                yield chunk?;
            }
        })
    }

    /// Same block of the same compiled template.
    pub fn ptr_eq(&self, other: &BlockFn) -> bool {
        Arc::ptr_eq(&self.code, &other.code) && self.name == other.name
    }
}

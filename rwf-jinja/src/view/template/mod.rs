//! Compiled templates.
//!
//! Source goes through the lexer, the parser and the code generator
//! once; the resulting [`Code`](compiler::Code) is shared by every render
//! of the template and can be stored in a bytecode cache.
pub mod compiler;
pub mod error;
pub mod language;
pub mod lexer;
pub mod runtime;

pub use error::Error;
pub use lexer::{Lexer, ToTemplateValue, Token, TokenWithContext, Tokenize, Value};
pub use runtime::{BlockFn, ChunkStream, Context, Module, Output};

use crate::view::environment::{Environment, WeakEnvironment};
use crate::view::loader::UpToDate;

use compiler::Code;
use runtime::{chunks, execute, Scope};

use async_stream::try_stream;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::OnceCell;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// A compiled template, bound to the environment that loaded it.
pub struct Template {
    id: u64,
    code: Arc<Code>,
    environment: WeakEnvironment,
    globals: Mutex<HashMap<String, Value>>,
    blocks: HashMap<String, BlockFn>,
    uptodate: Option<UpToDate>,
    module: OnceCell<Arc<Module>>,
}

impl std::fmt::Debug for Template {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Template")
            .field("id", &self.id)
            .field("name", &self.code.name)
            .field("filename", &self.code.filename)
            .finish()
    }
}

impl Template {
    pub fn from_code(
        environment: &Environment,
        code: Arc<Code>,
        globals: HashMap<String, Value>,
        uptodate: Option<UpToDate>,
    ) -> Self {
        let blocks = code
            .block_names()
            .map(|name| (name.to_string(), BlockFn::new(code.clone(), name)))
            .collect();

        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            code,
            environment: environment.downgrade(),
            globals: Mutex::new(globals),
            blocks,
            uptodate,
            module: OnceCell::new(),
        }
    }

    /// Unique for every compiled instance. A reloaded template gets a new id.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.code.name
    }

    pub fn filename(&self) -> Option<&str> {
        self.code.filename.as_deref()
    }

    pub fn code(&self) -> &Arc<Code> {
        &self.code
    }

    /// Render functions of the blocks this template defines.
    pub fn blocks(&self) -> &HashMap<String, BlockFn> {
        &self.blocks
    }

    pub fn globals(&self) -> HashMap<String, Value> {
        self.globals.lock().clone()
    }

    pub fn merge_globals(&self, globals: HashMap<String, Value>) {
        self.globals.lock().extend(globals);
    }

    /// Ask the loader if the source changed since the template was compiled.
    pub async fn is_up_to_date(&self) -> bool {
        match self.uptodate {
            Some(ref uptodate) => uptodate().await,
            None => true,
        }
    }

    /// Create the render context.
    ///
    /// A shared context uses `vars` as-is, otherwise the environment and
    /// template globals are added underneath. `locals` override both.
    pub fn new_context(
        &self,
        vars: &HashMap<String, Value>,
        shared: bool,
        locals: &HashMap<String, Value>,
    ) -> Result<Context, Error> {
        let environment = self.environment.upgrade()?;

        let mut all = if shared {
            vars.clone()
        } else {
            let mut all = environment.globals();
            all.extend(self.globals());
            all.extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));
            all
        };
        all.extend(locals.iter().map(|(k, v)| (k.clone(), v.clone())));

        let blocks = self
            .blocks
            .iter()
            .map(|(name, block)| (name.clone(), vec![block.clone()]))
            .collect();

        Ok(Context::new(environment, self.name(), all, blocks))
    }

    /// Render the template body with an existing context.
    pub fn root_render<'a>(&'a self, context: &'a Context) -> ChunkStream<'a> {
        chunks(try_stream! {
            let mut scope = Scope::default();
            let mut stream = execute(self.name(), &self.code.root, context, &mut scope);

            while let Some(chunk) = stream.next().await {
                yield chunk?;
            }
        })
    }

    /// Render the template as a stream of chunks.
    pub fn stream<'a>(&'a self, vars: &'a HashMap<String, Value>) -> ChunkStream<'a> {
        chunks(try_stream! {
            let context = self.new_context(vars, false, &HashMap::new())?;
            let mut stream = self.root_render(&context);

            while let Some(chunk) = stream.next().await {
                yield chunk?;
            }
        })
    }

    /// Render the template to a string.
    pub async fn render(&self, vars: &HashMap<String, Value>) -> Result<String, Error> {
        Output::default().collect(self.stream(vars)).await
    }

    /// Render the template without any variables.
    pub async fn render_default(&self) -> Result<String, Error> {
        self.render(&HashMap::new()).await
    }

    /// Render the template and capture its exports.
    pub async fn make_module(
        &self,
        vars: &HashMap<String, Value>,
        shared: bool,
        locals: &HashMap<String, Value>,
    ) -> Result<Module, Error> {
        let context = self.new_context(vars, shared, locals)?;

        let mut body = vec![];
        let mut stream = self.root_render(&context);
        while let Some(chunk) = stream.next().await {
            body.push(chunk?);
        }
        drop(stream);

        Ok(Module::new(self.name(), context.exported(), body))
    }

    /// The module rendered without any context, computed once.
    pub async fn default_module(&self) -> Result<Arc<Module>, Error> {
        self.module
            .get_or_try_init(|| async {
                let module = self
                    .make_module(&HashMap::new(), false, &HashMap::new())
                    .await?;
                Ok::<_, Error>(Arc::new(module))
            })
            .await
            .cloned()
    }
}

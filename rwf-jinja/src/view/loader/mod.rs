//! Template loaders.
//!
//! A loader finds the source of a template by name. The default
//! [`Loader::load`] takes care of the rest: it consults the bytecode
//! cache, compiles on a miss and builds the [`Template`].
pub mod choice;
pub mod dict;
pub mod filesystem;

pub use choice::ChoiceLoader;
pub use dict::{DictLoader, FunctionLoader};
pub use filesystem::FileSystemLoader;

use super::environment::Environment;
use super::template::{Error, Template, Value};

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::debug;

use std::collections::HashMap;
use std::sync::Arc;

/// Checks if the template source changed since it was loaded.
pub type UpToDate = Arc<dyn Fn() -> BoxFuture<'static, bool> + Send + Sync>;

/// Template source as returned by a loader.
#[derive(Clone)]
pub struct Source {
    pub source: String,
    pub filename: Option<String>,
    pub uptodate: Option<UpToDate>,
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Source")
            .field("filename", &self.filename)
            .field("len", &self.source.len())
            .finish()
    }
}

impl Source {
    pub fn new(source: impl ToString) -> Self {
        Self {
            source: source.to_string(),
            filename: None,
            uptodate: None,
        }
    }

    pub fn filename(mut self, filename: impl ToString) -> Self {
        self.filename = Some(filename.to_string());
        self
    }

    pub fn uptodate(mut self, uptodate: UpToDate) -> Self {
        self.uptodate = Some(uptodate);
        self
    }
}

#[async_trait]
pub trait Loader: Send + Sync {
    /// Find the source of the template.
    async fn get_source(&self, environment: &Environment, name: &str) -> Result<Source, Error> {
        let _ = environment;
        Err(Error::TemplateNotFound(name.to_string()))
    }

    /// Names of all templates this loader can find.
    async fn list_templates(&self) -> Result<Vec<String>, Error> {
        Err(Error::CannotEnumerate)
    }

    /// Load and compile the template.
    async fn load(
        &self,
        environment: &Environment,
        name: &str,
        globals: HashMap<String, Value>,
    ) -> Result<Arc<Template>, Error> {
        let source = self.get_source(environment, name).await?;
        let filename = source.filename.as_deref();
        let bytecode_cache = environment.bytecode_cache();

        let bucket = match bytecode_cache {
            Some(ref cache) => Some(
                cache
                    .get_bucket(environment, name, filename, &source.source)
                    .await,
            ),
            None => None,
        };

        let cached = bucket.as_ref().and_then(|bucket| bucket.code.clone());

        let code = match cached {
            Some(code) => {
                debug!("template \"{}\" loaded from bytecode cache", name);
                code
            }
            None => {
                let code = Arc::new(environment.compile(&source.source, Some(name), filename)?);

                if let (Some(cache), Some(mut bucket)) = (bytecode_cache, bucket) {
                    bucket.code = Some(code.clone());
                    cache.set_bucket(&bucket).await;
                }

                code
            }
        };

        Ok(Arc::new(Template::from_code(
            environment,
            code,
            globals,
            source.uptodate,
        )))
    }
}

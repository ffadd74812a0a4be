//! Rendering templates for HTTP responses.
//!
//! [`Templates`] ties the [`Environment`] to the response-layer caches:
//! block render functions used by fragment rendering, the output of context
//! processors and a pool of context maps.
//!
//! # Example
//!
//! ```
//! use rwf_jinja::view::{DictLoader, Environment, Templates};
//! use rwf_jinja::config::TemplatesConfig;
//! use std::collections::HashMap;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), rwf_jinja::view::Error> {
//! let environment = Environment::builder()
//!     .loader(DictLoader::new([("nav.html", "{% block links %}<a>Home</a>{% endblock %}")]))
//!     .build();
//! let templates = Templates::with_environment(environment, &TemplatesConfig::default());
//!
//! let links = templates
//!     .render_fragment("nav.html", "links", HashMap::new())
//!     .await?;
//! assert_eq!(links, "<a>Home</a>");
//! # Ok(())
//! # }
//! ```
use super::bccache::{RedisStore, RemoteBytecodeCache};
use super::cache::{BlockCache, ContextCache, ContextPool};
use super::environment::{Environment, EnvironmentBuilder, WeakEnvironment};
use super::loader::FileSystemLoader;
use super::response::{RequestLike, Response};
use super::template::{runtime::Function, BlockFn, Error, Output, Template, Value};
use crate::config::{Config, TemplatesConfig};

use futures::FutureExt;
use tracing::{debug, error};

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Computes template variables from the request.
///
/// Any `Fn(&dyn RequestLike) -> HashMap<String, Value>` closure is a processor.
pub trait ContextProcessor: Send + Sync {
    fn process(&self, request: &dyn RequestLike) -> HashMap<String, Value>;
}

impl<F> ContextProcessor for F
where
    F: Fn(&dyn RequestLike) -> HashMap<String, Value> + Send + Sync,
{
    fn process(&self, request: &dyn RequestLike) -> HashMap<String, Value> {
        self(request)
    }
}

/// Templates facade.
pub struct Templates {
    environment: Environment,
    processors: Vec<Arc<dyn ContextProcessor>>,
    context_cache: ContextCache,
    block_cache: BlockCache,
    pool: ContextPool,
    fragment_buffer_threshold: usize,
}

impl std::fmt::Debug for Templates {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Templates")
            .field("environment", &self.environment)
            .field("processors", &self.processors.len())
            .field("block_cache", &self.block_cache)
            .field("context_cache", &self.context_cache)
            .finish()
    }
}

impl Templates {
    /// Load templates from a directory, with default settings.
    pub fn new(directory: impl AsRef<Path>) -> Self {
        let config = TemplatesConfig {
            directory: directory.as_ref().to_owned(),
            ..Default::default()
        };

        Self::with_environment(
            EnvironmentBuilder::from_config(&config)
                .loader(FileSystemLoader::new(&config.directory))
                .build(),
            &config,
        )
    }

    /// Create templates as described by the configuration.
    pub fn from_config(config: &Config) -> Self {
        let mut builder = EnvironmentBuilder::from_config(&config.templates)
            .loader(FileSystemLoader::new(&config.templates.directory));

        if let Some(ref cache) = config.bytecode_cache {
            match RedisStore::open(&cache.address) {
                Ok(store) => {
                    builder =
                        builder.bytecode_cache(RemoteBytecodeCache::new(store, &cache.prefix))
                }
                Err(err) => error!("bytecode cache disabled, \"{}\": {}", cache.address, err),
            }
        }

        Self::with_environment(builder.build(), &config.templates)
    }

    /// Use an existing environment.
    pub fn with_environment(environment: Environment, config: &TemplatesConfig) -> Self {
        environment.add_global(
            "render_block",
            Value::Function(render_block_function(environment.downgrade())),
        );

        Self {
            environment,
            processors: vec![],
            context_cache: ContextCache::new(
                config.context_cache_size,
                Duration::from_secs(config.context_cache_ttl),
            ),
            block_cache: BlockCache::new(
                config.block_cache_size,
                Duration::from_secs(config.block_cache_ttl),
            ),
            pool: ContextPool::new(config.context_pool_size),
            fragment_buffer_threshold: config.fragment_buffer_threshold,
        }
    }

    /// Add a context processor. Processors run in the order they were added.
    pub fn context_processor(mut self, processor: impl ContextProcessor + 'static) -> Self {
        self.processors.push(Arc::new(processor));
        self
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn block_cache(&self) -> &BlockCache {
        &self.block_cache
    }

    pub fn context_cache(&self) -> &ContextCache {
        &self.context_cache
    }

    pub fn pool(&self) -> &ContextPool {
        &self.pool
    }

    /// Load a template.
    pub async fn get_template(&self, name: &str) -> Result<Arc<Template>, Error> {
        load(&self.environment, name).await
    }

    /// Render a template to a string.
    pub async fn renderer(
        &self,
        name: &str,
        vars: &HashMap<String, Value>,
    ) -> Result<String, Error> {
        render(&self.environment, name, vars).await
    }

    /// Render a template as markup that won't be escaped again.
    pub async fn render_block(
        &self,
        name: &str,
        vars: &HashMap<String, Value>,
    ) -> Result<Value, Error> {
        render_block(&self.environment, name, vars).await
    }

    /// Render one block of a template.
    pub async fn render_fragment(
        &self,
        template: &str,
        block: &str,
        vars: HashMap<String, Value>,
    ) -> Result<String, Error> {
        // Known block names can only be trusted while templates can't reload.
        if !self.environment.auto_reload()
            && self.block_cache.validate(template, block) == Some(false)
        {
            return Err(Error::block_not_found(block, template));
        }

        let estimated = estimate_size(&vars);
        let vars = self.pool.checkout(vars);

        let result = async {
            let (function, loaded) = self.block_function(template, block).await?;
            let context = loaded.new_context(&vars, false, &HashMap::new())?;

            Output::with_estimate(estimated, self.fragment_buffer_threshold)
                .collect(function.call(&context))
                .await
        }
        .await;

        drop(vars);

        match result {
            Ok(output) => Ok(output),
            Err(err @ Error::BlockNotFound { .. }) => Err(err),
            Err(err) => Err(Error::Fragment {
                block: block.to_string(),
                template: template.to_string(),
                source: Box::new(self.environment.handle_exception(err, template)),
            }),
        }
    }

    // The template is always loaded: the render context needs it,
    // even when the block function is cached.
    async fn block_function(
        &self,
        template: &str,
        block: &str,
    ) -> Result<(BlockFn, Arc<Template>), Error> {
        let loaded = self.get_template(template).await?;
        self.block_cache.observe(&loaded);

        let function = match self.block_cache.get(template, block) {
            Some(function) => function,
            None => {
                let function = loaded
                    .blocks()
                    .get(block)
                    .cloned()
                    .ok_or_else(|| Error::block_not_found(block, template))?;
                self.block_cache.insert(template, block, function.clone());
                function
            }
        };

        Ok((function, loaded))
    }

    /// Render a full page for the request.
    ///
    /// The request is available to the template as `request`, unless the caller
    /// already set that variable. Variables from context processors override
    /// the ones passed in.
    pub async fn template_response(
        &self,
        request: &dyn RequestLike,
        name: &str,
        context: HashMap<String, Value>,
    ) -> Result<Response, Error> {
        let result = async {
            let mut context = context;
            context
                .entry("request".to_string())
                .or_insert_with(|| request.to_value());
            context.extend(self.context_cache.processed(request, &self.processors));

            let template = self.get_template(name).await?;
            let content = template.render(&context).await?;
            debug!("rendered \"{}\" for {}", name, request.method());

            Ok::<_, Error>(Response::new().html(content).with_template(name, context))
        }
        .await;

        result.map_err(|err| Error::Response {
            name: name.to_string(),
            source: Box::new(err),
        })
    }
}

fn estimate_size(vars: &HashMap<String, Value>) -> usize {
    vars.iter()
        .map(|(key, value)| key.len() + value.to_string().len())
        .sum()
}

async fn load(environment: &Environment, name: &str) -> Result<Arc<Template>, Error> {
    environment
        .get_template(name, None, None)
        .await
        .map_err(|err| Error::Load {
            name: name.to_string(),
            source: Box::new(err),
        })
}

async fn render(
    environment: &Environment,
    name: &str,
    vars: &HashMap<String, Value>,
) -> Result<String, Error> {
    let result = match load(environment, name).await {
        Ok(template) => template.render(vars).await,
        Err(err) => Err(err),
    };

    result.map_err(|err| Error::Render {
        template: name.to_string(),
        source: Box::new(err),
    })
}

async fn render_block(
    environment: &Environment,
    name: &str,
    vars: &HashMap<String, Value>,
) -> Result<Value, Error> {
    render(environment, name, vars)
        .await
        .map(Value::Safe)
        .map_err(|err| Error::Block {
            name: name.to_string(),
            source: Box::new(err),
        })
}

/// `render_block(name, vars)` callable from templates.
fn render_block_function(environment: WeakEnvironment) -> Function {
    Function::new("render_block", move |args| {
        let environment = environment.clone();

        async move {
            let mut args = args.into_iter();

            let name = match args.next() {
                Some(Value::String(name)) | Some(Value::Safe(name)) => name,
                _ => {
                    return Err(Error::Runtime(
                        "render_block() expects a template name".into(),
                    ))
                }
            };

            let vars = match args.next() {
                Some(Value::Hash(vars)) => vars,
                None | Some(Value::Null) => HashMap::new(),
                Some(_) => {
                    return Err(Error::Runtime(
                        "render_block() variables must be a hash".into(),
                    ))
                }
            };

            render_block(&environment.upgrade()?, &name, &vars).await
        }
        .boxed()
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::view::loader::DictLoader;
    use crate::view::response::Request;

    use std::sync::atomic::{AtomicUsize, Ordering};

    fn templates(sources: &[(&str, &str)]) -> Templates {
        let environment = Environment::builder()
            .loader(DictLoader::new(sources.iter().copied()))
            .build();
        Templates::with_environment(environment, &TemplatesConfig::default())
    }

    #[tokio::test]
    async fn test_render_fragment() -> Result<(), Error> {
        let templates = templates(&[(
            "page.html",
            "<main>{% block title %}<h1>{{ title }}</h1>{% endblock %}</main>",
        )]);

        let vars = HashMap::from([("title".to_string(), Value::String("Hi".into()))]);
        let title = templates.render_fragment("page.html", "title", vars).await?;

        assert_eq!(title, "<h1>Hi</h1>");
        assert_eq!(templates.block_cache().len(), 1);
        assert_eq!(templates.pool().len(), 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_missing_block() -> Result<(), Error> {
        let templates = templates(&[("page.html", "{% block b %}X{% endblock %}")]);

        // First time, found while loading the template.
        let err = templates
            .render_fragment("page.html", "missing", HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BlockNotFound { .. }));

        templates
            .render_fragment("page.html", "b", HashMap::new())
            .await?;

        let err = templates
            .render_fragment("page.html", "missing", HashMap::new())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Block 'missing' not found in template 'page.html'"
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_block_added_after_reload() -> Result<(), Error> {
        let loader = DictLoader::new([("page.html", "{% block b %}X{% endblock %}")]);
        let templates = Templates::with_environment(
            Environment::builder()
                .loader(loader.clone())
                .auto_reload(true)
                .build(),
            &TemplatesConfig::default(),
        );

        assert_eq!(
            templates
                .render_fragment("page.html", "b", HashMap::new())
                .await?,
            "X"
        );
        assert!(matches!(
            templates
                .render_fragment("page.html", "c", HashMap::new())
                .await,
            Err(Error::BlockNotFound { .. })
        ));

        loader.insert(
            "page.html",
            "{% block b %}X{% endblock %}{% block c %}C{% endblock %}",
        );

        assert_eq!(templates.renderer("page.html", &HashMap::new()).await?, "XC");
        assert_eq!(
            templates
                .render_fragment("page.html", "c", HashMap::new())
                .await?,
            "C"
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_known_blocks_without_reload() -> Result<(), Error> {
        let templates = Templates::with_environment(
            Environment::builder()
                .loader(DictLoader::new([("page.html", "{% block b %}X{% endblock %}")]))
                .auto_reload(false)
                .build(),
            &TemplatesConfig::default(),
        );

        templates
            .render_fragment("page.html", "b", HashMap::new())
            .await?;
        assert_eq!(templates.block_cache().validate("page.html", "c"), Some(false));
        assert!(matches!(
            templates
                .render_fragment("page.html", "c", HashMap::new())
                .await,
            Err(Error::BlockNotFound { .. })
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_fragment_errors_wrapped() {
        let templates = templates(&[("page.html", "{% block b %}{{ nope }}{% endblock %}")]);

        let err = templates
            .render_fragment("page.html", "b", HashMap::new())
            .await
            .unwrap_err();

        assert!(err
            .to_string()
            .starts_with("Error rendering fragment 'b' in template 'page.html'"));
        assert_eq!(templates.pool().len(), 1);

        let err = templates
            .render_fragment("missing.html", "b", HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Fragment { .. }));
    }

    #[tokio::test]
    async fn test_large_fragment_uses_buffer() -> Result<(), Error> {
        let environment = Environment::builder()
            .loader(DictLoader::new([(
                "list.html",
                "{% block items %}{% for item in items %}<li>{{ item }}</li>{% endfor %}{% endblock %}",
            )]))
            .build();
        let config = TemplatesConfig {
            fragment_buffer_threshold: 8,
            ..Default::default()
        };
        let templates = Templates::with_environment(environment, &config);

        let items = (0..10).map(Value::Integer).collect();
        let vars = HashMap::from([("items".to_string(), Value::List(items))]);
        let html = templates.render_fragment("list.html", "items", vars).await?;

        assert!(html.starts_with("<li>0</li><li>1</li>"));
        assert!(html.ends_with("<li>9</li>"));

        Ok(())
    }

    #[tokio::test]
    async fn test_renderer_and_render_block() -> Result<(), Error> {
        let templates = templates(&[("nav.html", "<nav>{{ title }}</nav>")]);
        let vars = HashMap::from([("title".to_string(), Value::String("<home>".into()))]);

        assert_eq!(
            templates.renderer("nav.html", &vars).await?,
            "<nav>&lt;home&gt;</nav>"
        );

        let block = templates.render_block("nav.html", &vars).await?;
        assert!(block.is_safe());

        let err = templates
            .renderer("missing.html", &vars)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error rendering template 'missing.html': Error loading template 'missing.html': \
             template \"missing.html\" does not exist"
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_render_block_global() -> Result<(), Error> {
        let templates = templates(&[
            ("nav.html", "<nav>home</nav>"),
            ("page.html", "{{ render_block(\"nav.html\") }}<main></main>"),
        ]);

        let html = templates.renderer("page.html", &HashMap::new()).await?;
        assert_eq!(html, "<nav>home</nav><main></main>");

        Ok(())
    }

    #[tokio::test]
    async fn test_template_response() -> Result<(), Error> {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let templates = templates(&[(
            "page.html",
            "{{ request.method }} {{ request.url.path }} {{ site }}",
        )])
        .context_processor(move |_: &dyn RequestLike| {
            counter.fetch_add(1, Ordering::SeqCst);
            HashMap::from([("site".to_string(), Value::String("rwf".into()))])
        });

        let context = HashMap::from([("site".to_string(), Value::String("caller".into()))]);
        let response = templates
            .template_response(&Request::get("/about"), "page.html", context)
            .await?;

        assert_eq!(response.text(), "GET /about rwf");
        assert_eq!(response.media_type(), "text/html");
        assert_eq!(response.template(), Some("page.html"));
        assert!(response.context()["request"].is_request_like());

        templates
            .template_response(&Request::get("/about"), "page.html", HashMap::new())
            .await?;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let err = templates
            .template_response(&Request::get("/"), "missing.html", HashMap::new())
            .await
            .unwrap_err();
        assert!(err
            .to_string()
            .starts_with("Error creating template response for 'missing.html'"));

        Ok(())
    }
}

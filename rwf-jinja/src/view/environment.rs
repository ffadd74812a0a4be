//! The template environment.
//!
//! Holds the loader, the bytecode cache and the global variables, and
//! keeps compiled templates in memory so they are only loaded once.
//! With auto-reload on, a cached template is checked against its source
//! before it's reused.
use super::bccache::BytecodeCache;
use super::cache::TimedCache;
use super::loader::Loader;
use super::template::{
    compiler::{Code, CodeGenerator, BYTECODE_VERSION},
    language::Parser,
    Error, Template, ToTemplateValue, Value,
};
use crate::config::TemplatesConfig;
use crate::escape_html;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

static NEXT_LOADER: AtomicU64 = AtomicU64::new(1);

/// Loader identity and template name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    loader: u64,
    name: String,
}

// Every attached loader gets its own id, so templates cached
// for a replaced loader are never returned for the new one.
#[derive(Clone)]
struct Attached {
    id: u64,
    loader: Arc<dyn Loader>,
}

impl Attached {
    fn new(loader: Arc<dyn Loader>) -> Self {
        Self {
            id: NEXT_LOADER.fetch_add(1, Ordering::Relaxed),
            loader,
        }
    }
}

/// A template name or an already loaded template.
#[derive(Debug, Clone)]
pub enum TemplateRef {
    Name(String),
    Template(Arc<Template>),
}

impl From<&str> for TemplateRef {
    fn from(name: &str) -> Self {
        TemplateRef::Name(name.to_string())
    }
}

impl From<String> for TemplateRef {
    fn from(name: String) -> Self {
        TemplateRef::Name(name)
    }
}

impl From<&String> for TemplateRef {
    fn from(name: &String) -> Self {
        TemplateRef::Name(name.clone())
    }
}

impl From<Arc<Template>> for TemplateRef {
    fn from(template: Arc<Template>) -> Self {
        TemplateRef::Template(template)
    }
}

struct Inner {
    loader: RwLock<Option<Attached>>,
    bytecode_cache: RwLock<Option<Arc<dyn BytecodeCache>>>,
    globals: RwLock<HashMap<String, Value>>,
    cache: Mutex<TimedCache<CacheKey, Arc<Template>>>,
    autoescape: bool,
    auto_reload: bool,
}

/// Template environment. Cloning it is cheap and
/// the clones share everything.
#[derive(Clone)]
pub struct Environment {
    inner: Arc<Inner>,
}

/// Reference to an environment that doesn't keep it alive.
#[derive(Clone, Default)]
pub struct WeakEnvironment {
    inner: Weak<Inner>,
}

impl WeakEnvironment {
    pub fn upgrade(&self) -> Result<Environment, Error> {
        self.inner
            .upgrade()
            .map(|inner| Environment { inner })
            .ok_or(Error::EnvironmentDropped)
    }
}

impl std::fmt::Debug for WeakEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "WeakEnvironment")
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("autoescape", &self.inner.autoescape)
            .field("auto_reload", &self.inner.auto_reload)
            .field("cached", &self.inner.cache.lock().len())
            .finish()
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Environment {
    pub fn builder() -> EnvironmentBuilder {
        EnvironmentBuilder::default()
    }

    pub fn downgrade(&self) -> WeakEnvironment {
        WeakEnvironment {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn autoescape(&self) -> bool {
        self.inner.autoescape
    }

    pub fn auto_reload(&self) -> bool {
        self.inner.auto_reload
    }

    pub fn loader(&self) -> Option<Arc<dyn Loader>> {
        self.attached().map(|attached| attached.loader)
    }

    fn attached(&self) -> Option<Attached> {
        self.inner.loader.read().clone()
    }

    pub fn set_loader(&self, loader: impl Loader + 'static) {
        *self.inner.loader.write() = Some(Attached::new(Arc::new(loader)));
    }

    pub fn bytecode_cache(&self) -> Option<Arc<dyn BytecodeCache>> {
        self.inner.bytecode_cache.read().clone()
    }

    pub fn set_bytecode_cache(&self, cache: impl BytecodeCache + 'static) {
        *self.inner.bytecode_cache.write() = Some(Arc::new(cache));
    }

    /// Identifies the compiled code format.
    pub fn bytecode_magic(&self) -> String {
        format!("rwf-jinja/{}/{}", env!("CARGO_PKG_VERSION"), BYTECODE_VERSION)
    }

    /// Variables available to every template.
    pub fn globals(&self) -> HashMap<String, Value> {
        self.inner.globals.read().clone()
    }

    pub fn add_global(&self, name: &str, value: Value) {
        self.inner.globals.write().insert(name.to_string(), value);
    }

    /// Drop all cached templates.
    pub fn clear_cache(&self) {
        self.inner.cache.lock().clear();
    }

    /// Number of cached templates.
    pub fn cached(&self) -> usize {
        self.inner.cache.lock().len()
    }

    /// Resolve `template` relative to the template including it.
    ///
    /// Only names starting with `./` or `../` are relative, everything
    /// else is already a full template name.
    pub fn join_path(&self, template: &str, parent: &str) -> String {
        if !template.starts_with("./") && !template.starts_with("../") {
            return template.to_string();
        }

        let mut pieces = parent.split('/').collect::<Vec<_>>();
        pieces.pop();

        for piece in template.split('/') {
            match piece {
                "." | "" => (),
                ".." => {
                    pieces.pop();
                }
                piece => pieces.push(piece),
            }
        }

        pieces.join("/")
    }

    /// Load a template.
    ///
    /// `parent` is the name of the template asking for it, used to
    /// resolve relative names. `globals` are merged into the template's
    /// own globals, also when it comes from the cache.
    pub async fn get_template(
        &self,
        name: impl Into<TemplateRef>,
        parent: Option<&str>,
        globals: Option<HashMap<String, Value>>,
    ) -> Result<Arc<Template>, Error> {
        let name = match name.into() {
            TemplateRef::Template(template) => return Ok(template),
            TemplateRef::Name(name) => name,
        };

        let name = match parent {
            Some(parent) => self.join_path(&name, parent),
            None => name,
        };

        self.load_template(&name, globals).await
    }

    async fn load_template(
        &self,
        name: &str,
        globals: Option<HashMap<String, Value>>,
    ) -> Result<Arc<Template>, Error> {
        let Attached { id, loader } = self.attached().ok_or(Error::NoLoader)?;
        let key = CacheKey {
            loader: id,
            name: name.to_string(),
        };

        let cached = self.inner.cache.lock().get(&key, Instant::now()).cloned();

        if let Some(template) = cached {
            if !self.inner.auto_reload || template.is_up_to_date().await {
                if let Some(globals) = globals {
                    template.merge_globals(globals);
                }

                // Keep recently used templates around.
                self.inner
                    .cache
                    .lock()
                    .insert(key, template.clone(), Instant::now());

                return Ok(template);
            }

            debug!("template \"{}\" changed, reloading", name);
        }

        let template = loader
            .load(self, name, globals.unwrap_or_default())
            .await?;

        let evicted = self
            .inner
            .cache
            .lock()
            .insert(key, template.clone(), Instant::now());

        if let Some(evicted) = evicted {
            debug!("template \"{}\" evicted from cache", evicted.name);
        }

        Ok(template)
    }

    /// Load the first template that exists.
    pub async fn select_template(
        &self,
        names: Vec<String>,
        parent: Option<&str>,
    ) -> Result<Arc<Template>, Error> {
        for name in &names {
            match self.get_template(name, parent, None).await {
                Err(err) if err.is_not_found() => continue,
                result => return result,
            }
        }

        Err(Error::TemplatesNotFound(names))
    }

    /// Load one template by name, or select among a list of names.
    pub async fn get_or_select_template(
        &self,
        target: Value,
        parent: Option<&str>,
    ) -> Result<Arc<Template>, Error> {
        match target {
            Value::String(name) | Value::Safe(name) => self.get_template(name, parent, None).await,
            Value::List(names) => {
                let names = names
                    .iter()
                    .map(|name| {
                        name.as_str().map(|name| name.to_string()).ok_or_else(|| {
                            Error::Runtime(format!("\"{}\" is not a template name", name))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;

                self.select_template(names, parent).await
            }
            value => Err(Error::Runtime(format!(
                "\"{}\" is not a template name",
                value
            ))),
        }
    }

    /// Names of all templates the loader knows about.
    pub async fn list_templates(&self) -> Result<Vec<String>, Error> {
        let loader = self.loader().ok_or(Error::NoLoader)?;
        loader.list_templates().await
    }

    /// Compile template source.
    pub fn compile(
        &self,
        source: &str,
        name: Option<&str>,
        filename: Option<&str>,
    ) -> Result<Code, Error> {
        let name = name.unwrap_or("<template>");

        let code = Parser::from_str(source)
            .and_then(|nodes| CodeGenerator::new(name, filename).generate(&nodes))
            .map_err(|err| err.pretty(source, filename.or(Some(name))))?;

        debug!("compiled template \"{}\"", name);

        Ok(code)
    }

    /// Compile a template that doesn't come from the loader.
    /// It isn't cached.
    pub fn from_string(&self, source: &str, name: Option<&str>) -> Result<Arc<Template>, Error> {
        let code = self.compile(source, name, None)?;
        Ok(Arc::new(Template::from_code(
            self,
            Arc::new(code),
            HashMap::new(),
            None,
        )))
    }

    /// Report an error raised while rendering `template`.
    pub fn handle_exception(&self, err: Error, template: &str) -> Error {
        match err {
            Error::BlockNotFound { .. } => err,
            err => {
                error!("error rendering \"{}\": {}", template, err);
                err
            }
        }
    }

    /// Print a value into the template output.
    pub fn render_value(&self, value: &Value) -> String {
        if value.is_safe() || !self.inner.autoescape {
            value.to_string()
        } else {
            escape_html(&value.to_string())
        }
    }
}

/// Configures and creates an [`Environment`].
pub struct EnvironmentBuilder {
    loader: Option<Arc<dyn Loader>>,
    bytecode_cache: Option<Arc<dyn BytecodeCache>>,
    globals: HashMap<String, Value>,
    autoescape: bool,
    auto_reload: bool,
    cache_size: usize,
}

impl Default for EnvironmentBuilder {
    fn default() -> Self {
        Self {
            loader: None,
            bytecode_cache: None,
            globals: HashMap::new(),
            autoescape: true,
            auto_reload: true,
            cache_size: 400,
        }
    }
}

impl EnvironmentBuilder {
    /// Options from the `[templates]` section of the config.
    pub fn from_config(config: &TemplatesConfig) -> Self {
        Self::default()
            .autoescape(config.autoescape)
            .auto_reload(config.auto_reload)
            .cache_size(config.cache_size)
    }

    pub fn loader(mut self, loader: impl Loader + 'static) -> Self {
        self.loader = Some(Arc::new(loader));
        self
    }

    pub fn bytecode_cache(mut self, cache: impl BytecodeCache + 'static) -> Self {
        self.bytecode_cache = Some(Arc::new(cache));
        self
    }

    pub fn autoescape(mut self, autoescape: bool) -> Self {
        self.autoescape = autoescape;
        self
    }

    pub fn auto_reload(mut self, auto_reload: bool) -> Self {
        self.auto_reload = auto_reload;
        self
    }

    /// Maximum number of cached templates. `0` disables the cache.
    pub fn cache_size(mut self, cache_size: usize) -> Self {
        self.cache_size = cache_size;
        self
    }

    /// Add a global variable. Values that can't be converted are skipped.
    pub fn global(mut self, name: &str, value: impl ToTemplateValue) -> Self {
        match value.to_template_value() {
            Ok(value) => {
                self.globals.insert(name.to_string(), value);
            }
            Err(err) => error!("global \"{}\" skipped: {}", name, err),
        }
        self
    }

    pub fn build(self) -> Environment {
        Environment {
            inner: Arc::new(Inner {
                loader: RwLock::new(self.loader.map(Attached::new)),
                bytecode_cache: RwLock::new(self.bytecode_cache),
                globals: RwLock::new(self.globals),
                cache: Mutex::new(TimedCache::new(self.cache_size, None)),
                autoescape: self.autoescape,
                auto_reload: self.auto_reload,
            }),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::view::loader::DictLoader;

    #[test]
    fn test_join_path() {
        let env = Environment::default();

        assert_eq!(env.join_path("nav.html", "pages/index.html"), "nav.html");
        assert_eq!(
            env.join_path("./nav.html", "pages/index.html"),
            "pages/nav.html"
        );
        assert_eq!(
            env.join_path("../layouts/base.html", "pages/users/index.html"),
            "pages/layouts/base.html"
        );
        assert_eq!(env.join_path("./nav.html", "index.html"), "nav.html");
    }

    #[tokio::test]
    async fn test_relative_include() -> Result<(), Error> {
        let env = Environment::builder()
            .loader(DictLoader::new([
                ("pages/index.html", r#"{% include "./nav.html" %}"#),
                ("pages/nav.html", "nav"),
            ]))
            .build();

        let template = env.get_template("pages/index.html", None, None).await?;
        assert_eq!(template.render_default().await?, "nav");

        Ok(())
    }

    #[tokio::test]
    async fn test_cache_and_pass_through() -> Result<(), Error> {
        let env = Environment::builder()
            .loader(DictLoader::new([("a.html", "{{ title }}")]))
            .auto_reload(false)
            .build();

        let first = env.get_template("a.html", None, None).await?;
        let second = env
            .get_template(
                "a.html",
                None,
                Some(HashMap::from([(
                    "title".to_string(),
                    Value::String("merged".into()),
                )])),
            )
            .await?;

        assert!(Arc::ptr_eq(&first, &second));
        // Merged globals are seen through every handle.
        assert_eq!(first.render_default().await?, "merged");

        let third = env.get_template(first.clone(), None, None).await?;
        assert!(Arc::ptr_eq(&first, &third));
        assert_eq!(env.cached(), 1);

        env.clear_cache();
        let reloaded = env.get_template("a.html", None, None).await?;
        assert!(!Arc::ptr_eq(&first, &reloaded));

        Ok(())
    }

    #[tokio::test]
    async fn test_cache_is_per_loader() -> Result<(), Error> {
        let env = Environment::builder()
            .loader(DictLoader::new([("a.html", "one")]))
            .build();

        let first = env.get_template("a.html", None, None).await?;
        env.set_loader(DictLoader::new([("a.html", "two")]));
        let second = env.get_template("a.html", None, None).await?;

        assert_eq!(first.render_default().await?, "one");
        assert_eq!(second.render_default().await?, "two");

        Ok(())
    }

    #[tokio::test]
    async fn test_cache_size() -> Result<(), Error> {
        let env = Environment::builder()
            .loader(DictLoader::new([("a.html", "a"), ("b.html", "b")]))
            .cache_size(1)
            .build();

        env.get_template("a.html", None, None).await?;
        env.get_template("b.html", None, None).await?;
        assert_eq!(env.cached(), 1);

        let uncached = Environment::builder()
            .loader(DictLoader::new([("a.html", "a")]))
            .cache_size(0)
            .build();
        let first = uncached.get_template("a.html", None, None).await?;
        let second = uncached.get_template("a.html", None, None).await?;
        assert!(!Arc::ptr_eq(&first, &second));

        Ok(())
    }

    #[tokio::test]
    async fn test_no_loader() {
        let env = Environment::default();

        assert!(matches!(
            env.get_template("a.html", None, None).await,
            Err(Error::NoLoader)
        ));
        assert_eq!(
            env.select_template(vec![], None).await.unwrap_err().to_string(),
            "Tried to select from an empty list of templates."
        );
    }

    #[tokio::test]
    async fn test_select_template() -> Result<(), Error> {
        let env = Environment::builder()
            .loader(DictLoader::new([("b.html", "b")]))
            .build();

        let template = env
            .select_template(vec!["a.html".into(), "b.html".into()], None)
            .await?;
        assert_eq!(template.name(), "b.html");

        let err = env
            .select_template(vec!["a.html".into(), "c.html".into()], None)
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let template = env
            .get_or_select_template(Value::String("b.html".into()), None)
            .await?;
        assert_eq!(template.name(), "b.html");
        assert!(env
            .get_or_select_template(Value::Integer(1), None)
            .await
            .is_err());

        Ok(())
    }

    #[test]
    fn test_compile_error_is_pretty() {
        let env = Environment::default();
        let err = env
            .compile("{% block a %}{% block a %}{% endblock %}{% endblock %}", Some("page.html"), None)
            .unwrap_err();

        assert!(err.to_string().contains("page.html"));
        assert!(err.to_string().contains("defined twice"));
    }

    #[tokio::test]
    async fn test_environment_dropped() -> Result<(), Error> {
        let env = Environment::default();
        let template = env.from_string("hello", None)?;
        drop(env);

        assert!(matches!(
            template.render_default().await,
            Err(Error::EnvironmentDropped)
        ));

        Ok(())
    }
}

use super::{Loader, Source, UpToDate};
use crate::view::environment::Environment;
use crate::view::template::Error;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::RwLock;

use std::collections::HashMap;
use std::sync::Arc;

/// Templates kept in memory, keyed by name.
///
/// Cloning the loader shares the templates, so templates
/// inserted later are seen by every clone.
#[derive(Debug, Clone, Default)]
pub struct DictLoader {
    templates: Arc<RwLock<HashMap<String, String>>>,
}

impl DictLoader {
    pub fn new<N: ToString, S: ToString>(templates: impl IntoIterator<Item = (N, S)>) -> Self {
        Self {
            templates: Arc::new(RwLock::new(
                templates
                    .into_iter()
                    .map(|(name, source)| (name.to_string(), source.to_string()))
                    .collect(),
            )),
        }
    }

    /// Add or replace a template.
    pub fn insert(&self, name: impl ToString, source: impl ToString) {
        self.templates
            .write()
            .insert(name.to_string(), source.to_string());
    }

    pub fn remove(&self, name: &str) {
        self.templates.write().remove(name);
    }
}

#[async_trait]
impl Loader for DictLoader {
    async fn get_source(&self, _environment: &Environment, name: &str) -> Result<Source, Error> {
        let source = self
            .templates
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::TemplateNotFound(name.to_string()))?;

        let templates = self.templates.clone();
        let (watched, loaded) = (name.to_string(), source.clone());
        let uptodate: UpToDate = Arc::new(move || {
            let current = templates.read().get(&watched).cloned();
            let fresh = current.as_deref() == Some(loaded.as_str());
            async move { fresh }.boxed()
        });

        Ok(Source::new(source).uptodate(uptodate))
    }

    async fn list_templates(&self) -> Result<Vec<String>, Error> {
        let mut names = self.templates.read().keys().cloned().collect::<Vec<_>>();
        names.sort();
        Ok(names)
    }
}

type SourceFn = dyn Fn(&str) -> Option<Source> + Send + Sync;

/// Asks a closure for the template source.
#[derive(Clone)]
pub struct FunctionLoader {
    func: Arc<SourceFn>,
}

impl FunctionLoader {
    pub fn new(func: impl Fn(&str) -> Option<Source> + Send + Sync + 'static) -> Self {
        Self {
            func: Arc::new(func),
        }
    }
}

#[async_trait]
impl Loader for FunctionLoader {
    async fn get_source(&self, _environment: &Environment, name: &str) -> Result<Source, Error> {
        (self.func)(name).ok_or_else(|| Error::TemplateNotFound(name.to_string()))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_dict_loader() -> Result<(), Error> {
        let loader = DictLoader::new([("a.html", "A")]);
        let env = Environment::default();

        let source = loader.get_source(&env, "a.html").await?;
        let uptodate = source.uptodate.expect("uptodate");
        assert_eq!(source.source, "A");
        assert!(uptodate().await);

        loader.insert("a.html", "B");
        assert!(!uptodate().await);

        loader.insert("b.html", "B");
        assert_eq!(loader.list_templates().await?, vec!["a.html", "b.html"]);

        Ok(())
    }

    #[tokio::test]
    async fn test_auto_reload() -> Result<(), Error> {
        let loader = DictLoader::new([("a.html", "A")]);
        let env = Environment::builder()
            .loader(loader.clone())
            .auto_reload(true)
            .build();

        let first = env.get_template("a.html", None, None).await?;
        assert!(Arc::ptr_eq(
            &first,
            &env.get_template("a.html", None, None).await?
        ));

        loader.insert("a.html", "B");
        let second = env.get_template("a.html", None, None).await?;
        assert_ne!(first.id(), second.id());
        assert_eq!(second.render_default().await?, "B");

        Ok(())
    }

    #[tokio::test]
    async fn test_function_loader() -> Result<(), Error> {
        let loader = FunctionLoader::new(|name| {
            name.strip_prefix("hello/")
                .map(|who| Source::new(format!("Hello {}", who)))
        });
        let env = Environment::builder().loader(loader).build();

        let template = env.get_template("hello/world", None, None).await?;
        assert_eq!(template.render_default().await?, "Hello world");
        assert!(env
            .get_template("bye", None, None)
            .await
            .unwrap_err()
            .is_not_found());

        Ok(())
    }
}

use super::{Loader, Source};
use crate::view::environment::Environment;
use crate::view::template::{Error, Template, Value};

use async_trait::async_trait;

use std::collections::HashMap;
use std::sync::Arc;

/// Tries a list of loaders in order.
#[derive(Clone, Default)]
pub struct ChoiceLoader {
    loaders: Vec<Arc<dyn Loader>>,
}

impl ChoiceLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn loader(mut self, loader: impl Loader + 'static) -> Self {
        self.loaders.push(Arc::new(loader));
        self
    }
}

#[async_trait]
impl Loader for ChoiceLoader {
    async fn get_source(&self, environment: &Environment, name: &str) -> Result<Source, Error> {
        for loader in &self.loaders {
            match loader.get_source(environment, name).await {
                Err(err) if err.is_not_found() => continue,
                result => return result,
            }
        }

        Err(Error::TemplateNotFound(name.to_string()))
    }

    async fn load(
        &self,
        environment: &Environment,
        name: &str,
        globals: HashMap<String, Value>,
    ) -> Result<Arc<Template>, Error> {
        for loader in &self.loaders {
            match loader.load(environment, name, globals.clone()).await {
                Err(err) if err.is_not_found() => continue,
                result => return result,
            }
        }

        Err(Error::TemplateNotFound(name.to_string()))
    }

    async fn list_templates(&self) -> Result<Vec<String>, Error> {
        let mut found = vec![];

        for loader in &self.loaders {
            found.extend(loader.list_templates().await?);
        }

        found.sort();
        found.dedup();
        Ok(found)
    }
}

use super::{execute, Context, Output, Scope};
use crate::view::environment::WeakEnvironment;
use crate::view::template::{compiler::MacroCode, Error, Value};

use futures::future::BoxFuture;

use std::collections::HashMap;
use std::sync::Arc;

/// A rendered template seen as a namespace: its top-level
/// exports and the output of its body.
#[derive(Debug)]
pub struct Module {
    name: String,
    exports: HashMap<String, Value>,
    body: Vec<String>,
}

impl Module {
    pub fn new(name: &str, exports: HashMap<String, Value>, body: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            exports,
            body,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn export(&self, name: &str) -> Option<Value> {
        self.exports.get(name).cloned()
    }

    pub fn exports(&self) -> &HashMap<String, Value> {
        &self.exports
    }

    /// Output chunks of the template body.
    pub fn body(&self) -> &[String] {
        &self.body
    }

    pub fn render(&self) -> String {
        self.body.concat()
    }
}

/// A macro defined with `{% macro %}`.
///
/// Sees the variables that were visible where it was defined.
pub struct Macro {
    code: Arc<MacroCode>,
    origin: String,
    closure: HashMap<String, Value>,
    environment: WeakEnvironment,
}

impl std::fmt::Debug for Macro {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Macro({}:{})", self.origin, self.code.name)
    }
}

impl Macro {
    pub fn new(
        code: Arc<MacroCode>,
        origin: &str,
        closure: HashMap<String, Value>,
        environment: WeakEnvironment,
    ) -> Self {
        Self {
            code,
            origin: origin.to_string(),
            closure,
            environment,
        }
    }

    pub fn name(&self) -> &str {
        &self.code.name
    }

    /// Render the macro body with the arguments bound to its parameters.
    /// Missing arguments are `none`.
    pub async fn call(self: Arc<Self>, args: Vec<Value>) -> Result<Value, Error> {
        if args.len() > self.code.params.len() {
            return Err(Error::Runtime(format!(
                "macro '{}' takes not more than {} argument(s)",
                self.code.name,
                self.code.params.len()
            )));
        }

        let environment = self.environment.upgrade()?;
        let context = Context::new(
            environment,
            &self.origin,
            self.closure.clone(),
            HashMap::new(),
        );

        let mut scope = Scope::default();
        let mut args = args.into_iter();
        for param in &self.code.params {
            scope.set(param, args.next().unwrap_or(Value::Null));
        }
        scope.set(&self.code.name, Value::Macro(self.clone()));

        let html = Output::default()
            .collect(execute(&self.origin, &self.code.body, &context, &mut scope))
            .await?;

        Ok(Value::Safe(html))
    }
}

type NativeFn = dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Value, Error>> + Send + Sync;

/// A function implemented in Rust and callable from templates,
/// e.g. `{{ render_block("nav.html") }}`.
#[derive(Clone)]
pub struct Function {
    name: Arc<str>,
    func: Arc<NativeFn>,
}

impl Function {
    pub fn new<F>(name: &str, func: F) -> Self
    where
        F: Fn(Vec<Value>) -> BoxFuture<'static, Result<Value, Error>> + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn call(&self, args: Vec<Value>) -> Result<Value, Error> {
        (self.func)(args).await
    }
}

impl std::fmt::Debug for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Function({})", self.name)
    }
}

impl PartialEq for Function {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.func, &other.func)
    }
}

//! Executes compiled template code.
//!
//! Rendering produces a lazy stream of output chunks in document order.
//! The stream suspends wherever another template has to be resolved
//! (`extends`, `include`, `import`) and while a macro or native function runs.
pub mod block;
pub mod context;
pub mod module;
pub mod output;

pub use block::BlockFn;
pub use context::Context;
pub use module::{Function, Macro, Module};
pub use output::Output;

use super::compiler::{Instruction, Lookup};
use super::language::Expression;
use super::{Error, Template, Value};

use async_stream::try_stream;
use futures::stream::{BoxStream, Stream, StreamExt};

use std::collections::HashMap;
use std::sync::Arc;

/// Rendered output, one chunk at a time.
pub type ChunkStream<'a> = BoxStream<'a, Result<String, Error>>;

pub(crate) fn chunks<'a, S>(stream: S) -> ChunkStream<'a>
where
    S: Stream<Item = Result<String, Error>> + Send + 'a,
{
    Box::pin(stream)
}

/// Local variables of the function being executed.
#[derive(Debug, Default)]
pub struct Scope {
    locals: HashMap<String, Value>,
    // Set by `extends` in the template body.
    parent: Option<Arc<Template>>,
}

impl Scope {
    pub fn new(locals: HashMap<String, Value>) -> Self {
        Self {
            locals,
            parent: None,
        }
    }

    pub fn resolve(&self, name: &str) -> Option<Value> {
        self.locals.get(name).cloned()
    }

    pub fn set(&mut self, name: &str, value: Value) {
        self.locals.insert(name.to_string(), value);
    }

    pub fn locals(&self) -> &HashMap<String, Value> {
        &self.locals
    }

    pub fn parent(&self) -> Option<&Arc<Template>> {
        self.parent.as_ref()
    }
}

/// Execute a list of instructions belonging to the template `origin`.
/// Relative template names are resolved against `origin`.
pub fn execute<'a>(
    origin: &'a str,
    body: &'a [Instruction],
    context: &'a Context,
    scope: &'a mut Scope,
) -> ChunkStream<'a> {
    chunks(try_stream! {
        for instruction in body {
            match instruction {
                Instruction::Text(text) => yield text.clone(),

                Instruction::Print(expression) => {
                    let value = expression.evaluate(context, scope).await?;
                    yield context.environment().render_value(&value);
                }

                Instruction::Guarded(body) => {
                    if scope.parent.is_none() {
                        let mut stream = execute(origin, body, context, scope);
                        while let Some(chunk) = stream.next().await {
                            yield chunk?;
                        }
                    }
                }

                Instruction::CallBlock { name, scoped, required } => {
                    let chain = context.block_chain(name);
                    check_required(name, *required, chain.len())?;

                    let block = chain
                        .into_iter()
                        .next()
                        .ok_or_else(|| Error::block_not_found(name, context.name()))?;

                    if *scoped {
                        let derived = context.derived(scope.locals());
                        let mut stream = block.call(&derived);
                        while let Some(chunk) = stream.next().await {
                            yield chunk?;
                        }
                    } else {
                        let mut stream = block.call(context);
                        while let Some(chunk) = stream.next().await {
                            yield chunk?;
                        }
                    }
                }

                Instruction::Extends { template, guarded } => {
                    check_extends(*guarded, scope)?;

                    let name = template_name(template.evaluate(context, scope).await?)?;
                    let parent = context
                        .environment()
                        .get_template(name, Some(origin), None)
                        .await?;

                    context.push_parent_blocks(parent.blocks().iter());
                    scope.parent = Some(parent);
                }

                Instruction::RenderParent => {
                    if let Some(parent) = scope.parent.clone() {
                        let mut stream = parent.root_render(context);
                        while let Some(chunk) = stream.next().await {
                            yield chunk?;
                        }
                    }
                }

                Instruction::Include { template, lookup, ignore_missing, with_context } => {
                    let target = template.evaluate(context, scope).await?;
                    let environment = context.environment();

                    let resolved = match lookup {
                        Lookup::Single => {
                            environment
                                .get_template(template_name(target)?, Some(origin), None)
                                .await
                        }
                        Lookup::Select => {
                            environment
                                .select_template(template_names(target)?, Some(origin))
                                .await
                        }
                        Lookup::Dynamic => {
                            environment.get_or_select_template(target, Some(origin)).await
                        }
                    };

                    let included = match resolved {
                        Err(err) if *ignore_missing && err.is_not_found() => None,
                        resolved => Some(resolved?),
                    };

                    if let Some(included) = included {
                        if *with_context {
                            let included_context =
                                included.new_context(&context.get_all(), true, scope.locals())?;
                            let mut stream = included.root_render(&included_context);
                            while let Some(chunk) = stream.next().await {
                                yield chunk?;
                            }
                        } else {
                            let module = included.default_module().await?;
                            for chunk in module.body() {
                                yield chunk.clone();
                            }
                        }
                    }
                }

                Instruction::Import { template, target, with_context, export } => {
                    let module = import(origin, template, *with_context, context, scope).await?;
                    assign(context, scope, target, Value::Module(module), *export);
                }

                Instruction::FromImport { template, names, with_context, export } => {
                    let module = import(origin, template, *with_context, context, scope).await?;

                    for (name, alias) in names {
                        let value = module.export(name).ok_or_else(|| {
                            Error::Runtime(format!(
                                "the template '{}' does not export the requested name '{}'",
                                module.name(),
                                name
                            ))
                        })?;

                        assign(context, scope, alias.as_ref().unwrap_or(name), value, *export);
                    }
                }

                Instruction::If { condition, body, otherwise } => {
                    let branch = if condition.evaluate(context, scope).await?.truthy() {
                        body
                    } else {
                        otherwise
                    };

                    let mut stream = execute(origin, branch, context, scope);
                    while let Some(chunk) = stream.next().await {
                        yield chunk?;
                    }
                }

                Instruction::For { target, iter, body } => {
                    let items = iter.evaluate(context, scope).await?.into_items()?;
                    let saved = scope.locals.clone();

                    for item in items {
                        scope.set(target, item);

                        let mut stream = execute(origin, body, context, scope);
                        while let Some(chunk) = stream.next().await {
                            yield chunk?;
                        }
                    }

                    // Loop variables don't leak.
                    scope.locals = saved;
                }

                Instruction::Set { name, value, export } => {
                    let value = value.evaluate(context, scope).await?;
                    assign(context, scope, name, value, *export);
                }

                Instruction::DefineMacro { code, export } => {
                    let mut closure = context.get_all();
                    closure.extend(scope.locals.iter().map(|(k, v)| (k.clone(), v.clone())));

                    let value = Value::Macro(Arc::new(Macro::new(
                        code.clone(),
                        origin,
                        closure,
                        context.environment().downgrade(),
                    )));

                    assign(context, scope, &code.name, value, *export);
                }
            }
        }
    })
}

// A required block has to be overridden by at least one child template.
fn check_required(name: &str, required: bool, chain: usize) -> Result<(), Error> {
    if required && chain <= 1 {
        Err(Error::Runtime(format!("Required block '{}' not found", name)))
    } else {
        Ok(())
    }
}

fn check_extends(guarded: bool, scope: &Scope) -> Result<(), Error> {
    if guarded && scope.parent.is_some() {
        Err(Error::Runtime("extended multiple times".into()))
    } else {
        Ok(())
    }
}

fn template_name(value: Value) -> Result<String, Error> {
    match value {
        Value::String(name) | Value::Safe(name) => Ok(name),
        value => Err(Error::Runtime(format!(
            "\"{}\" is not a template name",
            value
        ))),
    }
}

fn template_names(value: Value) -> Result<Vec<String>, Error> {
    match value {
        Value::List(names) => names.into_iter().map(template_name).collect(),
        value => Ok(vec![template_name(value)?]),
    }
}

// Top-level assignments go into the context and are exported,
// everything else stays local.
fn assign(context: &Context, scope: &mut Scope, name: &str, value: Value, export: bool) {
    if export {
        context.assign(name, value);
    } else {
        scope.set(name, value);
    }
}

async fn import(
    origin: &str,
    template: &Expression,
    with_context: bool,
    context: &Context,
    scope: &Scope,
) -> Result<Arc<Module>, Error> {
    let target = template.evaluate(context, scope).await?;
    let imported = context
        .environment()
        .get_or_select_template(target, Some(origin))
        .await?;

    if with_context {
        let module = imported
            .make_module(&context.get_all(), true, scope.locals())
            .await?;
        Ok(Arc::new(module))
    } else {
        imported.default_module().await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::view::environment::Environment;
    use crate::view::loader::DictLoader;

    fn environment(templates: &[(&str, &str)]) -> Environment {
        Environment::builder()
            .loader(DictLoader::new(templates.iter().copied()))
            .build()
    }

    async fn render(env: &Environment, name: &str) -> Result<String, Error> {
        env.get_template(name, None, None)
            .await?
            .render(&HashMap::new())
            .await
    }

    #[tokio::test]
    async fn test_innermost_override_wins() -> Result<(), Error> {
        let env = environment(&[
            ("base.html", "<title>{% block title %}Base{% endblock %}</title>"),
            ("middle.html", r#"{% extends "base.html" %}{% block title %}Middle{% endblock %}"#),
            ("child.html", r#"{% extends "middle.html" %}{% block title %}Child{% endblock %}"#),
        ]);

        assert_eq!(render(&env, "child.html").await?, "<title>Child</title>");
        assert_eq!(render(&env, "middle.html").await?, "<title>Middle</title>");
        assert_eq!(render(&env, "base.html").await?, "<title>Base</title>");

        Ok(())
    }

    #[tokio::test]
    async fn test_required_block() -> Result<(), Error> {
        let env = environment(&[
            ("base.html", "<p>{% block body required %}{% endblock %}</p>"),
            ("child.html", r#"{% extends "base.html" %}{% block body %}Yes{% endblock %}"#),
        ]);

        let err = render(&env, "base.html").await.unwrap_err();
        assert_eq!(err.to_string(), "Required block 'body' not found");
        assert_eq!(render(&env, "child.html").await?, "<p>Yes</p>");

        Ok(())
    }

    #[tokio::test]
    async fn test_required_block_fails_before_output() -> Result<(), Error> {
        let env = environment(&[(
            "base.html",
            "before{% block body required %}{% endblock %}after",
        )]);

        let template = env.get_template("base.html", None, None).await?;
        let context = template.new_context(&HashMap::new(), false, &HashMap::new())?;
        let mut stream = template.root_render(&context);

        assert_eq!(stream.next().await.transpose()?, Some("before".to_string()));
        assert!(stream.next().await.expect("chunk").is_err());

        Ok(())
    }

    #[tokio::test]
    async fn test_dynamic_extends_runs_once() -> Result<(), Error> {
        let env = environment(&[
            ("a.html", "A{% block b %}{% endblock %}"),
            (
                "child.html",
                r#"{% if true %}{% extends "a.html" %}{% endif %}{% extends "a.html" %}"#,
            ),
        ]);

        let err = render(&env, "child.html").await.unwrap_err();
        assert!(err.to_string().contains("extended multiple times"));

        Ok(())
    }

    #[tokio::test]
    async fn test_include() -> Result<(), Error> {
        let env = environment(&[
            ("nav.html", "<nav>{{ user }}</nav>"),
            ("static.html", "static"),
            ("page.html", r#"{% set user = "lev" %}{% include "nav.html" %}"#),
            ("missing.html", r#"[{% include "nope.html" ignore missing %}]"#),
            ("broken.html", r#"{% include "nope.html" %}"#),
            ("select.html", r#"{% include ["nope.html", "static.html"] without context %}"#),
            ("dynamic.html", r#"{% set name = "static.html" %}{% include name %}"#),
        ]);

        assert_eq!(render(&env, "page.html").await?, "<nav>lev</nav>");
        assert_eq!(render(&env, "missing.html").await?, "[]");
        assert!(render(&env, "broken.html").await.unwrap_err().is_not_found());
        assert_eq!(render(&env, "select.html").await?, "static");
        assert_eq!(render(&env, "dynamic.html").await?, "static");

        Ok(())
    }

    #[tokio::test]
    async fn test_include_without_context_hides_caller() -> Result<(), Error> {
        let env = environment(&[
            ("nav.html", "{{ user }}"),
            ("page.html", r#"{% set user = "lev" %}{% include "nav.html" without context %}"#),
        ]);

        assert!(matches!(
            render(&env, "page.html").await,
            Err(Error::UndefinedVariable(_))
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_macros_and_imports() -> Result<(), Error> {
        let env = environment(&[
            (
                "forms.html",
                r#"{% macro input(name, kind) %}<input name="{{ name }}" type="{{ kind }}">{% endmacro %}{% set _private = 1 %}"#,
            ),
            (
                "page.html",
                r#"{% import "forms.html" as forms %}{{ forms.input("email", "text") }}"#,
            ),
            (
                "from.html",
                r#"{% from "forms.html" import input as field %}{{ field("q") }}"#,
            ),
            ("private.html", r#"{% from "forms.html" import _private %}"#),
        ]);

        assert_eq!(
            render(&env, "page.html").await?,
            r#"<input name="email" type="text">"#
        );
        assert_eq!(render(&env, "from.html").await?, r#"<input name="q" type="">"#);

        let err = render(&env, "private.html").await.unwrap_err();
        assert!(err.to_string().contains("does not export the requested name '_private'"));

        Ok(())
    }

    #[tokio::test]
    async fn test_scoped_block_sees_loop_variable() -> Result<(), Error> {
        let env = environment(&[(
            "list.html",
            "{% for item in items %}{% block row scoped %}{{ item }};{% endblock %}{% endfor %}",
        )]);

        let template = env.get_template("list.html", None, None).await?;
        let vars = HashMap::from([(
            "items".to_string(),
            Value::List(vec![Value::Integer(1), Value::Integer(2)]),
        )]);

        assert_eq!(template.render(&vars).await?, "1;2;");

        Ok(())
    }

    #[tokio::test]
    async fn test_autoescape() -> Result<(), Error> {
        let env = environment(&[
            ("page.html", "{{ html }}{% macro b() %}<b>{% endmacro %}{{ b() }}"),
        ]);

        let template = env.get_template("page.html", None, None).await?;
        let vars = HashMap::from([("html".to_string(), Value::String("<i>".into()))]);

        assert_eq!(template.render(&vars).await?, "&lt;i&gt;<b>");

        Ok(())
    }
}

use rwf_jinja::async_trait;
use rwf_jinja::config::TemplatesConfig;
use rwf_jinja::view::bccache::MemoryStore;
use rwf_jinja::view::loader::Source;
use rwf_jinja::view::{
    DictLoader, Environment, Error, Loader, RemoteBytecodeCache, Request, RequestLike, Templates,
    Value,
};

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Counts how many times template source is read.
#[derive(Clone, Default)]
struct CountingLoader {
    templates: DictLoader,
    loads: Arc<AtomicUsize>,
}

impl CountingLoader {
    fn new(templates: &[(&str, &str)]) -> Self {
        Self {
            templates: DictLoader::new(templates.iter().copied()),
            loads: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Loader for CountingLoader {
    async fn get_source(&self, environment: &Environment, name: &str) -> Result<Source, Error> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.templates.get_source(environment, name).await
    }
}

fn templates(loader: CountingLoader) -> Templates {
    Templates::with_environment(
        Environment::builder().loader(loader).build(),
        &TemplatesConfig::default(),
    )
}

#[tokio::test]
async fn test_fragment_end_to_end() -> Result<(), Error> {
    let loader = CountingLoader::new(&[("page.html", "{% block b %}X{% endblock %}")]);
    let templates = templates(loader.clone());

    assert_eq!(
        templates
            .render_fragment("page.html", "b", HashMap::new())
            .await?,
        "X"
    );

    match templates
        .render_fragment("page.html", "missing", HashMap::new())
        .await
    {
        Err(Error::BlockNotFound { block, template }) => {
            assert_eq!(block, "missing");
            assert_eq!(template, "page.html");
        }
        result => panic!("expected missing block, got {:?}", result),
    }

    let second = templates
        .render_fragment("page.html", "b", HashMap::new())
        .await?;
    assert_eq!(second, "X");

    // The template is resolved on every call, but the environment
    // serves it from memory after the first read.
    assert_eq!(loader.loads(), 1);
    assert_eq!(templates.block_cache().len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_fragment_of_child_template() -> Result<(), Error> {
    let loader = CountingLoader::new(&[
        (
            "base.html",
            "<title>{% block title %}Base{% endblock %}</title>{% block body %}{% endblock %}",
        ),
        (
            "child.html",
            "{% extends \"base.html\" %}{% block title %}{{ name }}{% endblock %}",
        ),
    ]);
    let templates = templates(loader);

    let vars = HashMap::from([("name".to_string(), Value::String("Child".into()))]);
    let title = templates
        .render_fragment("child.html", "title", vars.clone())
        .await?;
    assert_eq!(title, "Child");

    let page = templates.renderer("child.html", &vars).await?;
    assert_eq!(page, "<title>Child</title>");

    Ok(())
}

#[tokio::test]
async fn test_required_block() -> Result<(), Error> {
    let loader = CountingLoader::new(&[
        ("base.html", "<p>{% block content required %}{% endblock %}</p>"),
        (
            "page.html",
            "{% extends \"base.html\" %}{% block content %}filled{% endblock %}",
        ),
    ]);
    let templates = templates(loader);

    let err = templates
        .renderer("base.html", &HashMap::new())
        .await
        .unwrap_err();
    assert!(err
        .to_string()
        .contains("Required block 'content' not found"));

    assert_eq!(
        templates.renderer("page.html", &HashMap::new()).await?,
        "<p>filled</p>"
    );

    Ok(())
}

#[tokio::test]
async fn test_bytecode_shared_between_environments() -> Result<(), Error> {
    let store = MemoryStore::default();
    let sources = [("page.html", "{% block b %}{{ greeting }}{% endblock %}")];

    let first = Environment::builder()
        .loader(DictLoader::new(sources))
        .bytecode_cache(RemoteBytecodeCache::new(store.clone(), "test"))
        .build();
    first.get_template("page.html", None, None).await?;
    assert_eq!(store.len(), 1);

    let second = Templates::with_environment(
        Environment::builder()
            .loader(DictLoader::new(sources))
            .bytecode_cache(RemoteBytecodeCache::new(store.clone(), "test"))
            .build(),
        &TemplatesConfig::default(),
    );
    let vars = HashMap::from([("greeting".to_string(), Value::String("hi".into()))]);

    assert_eq!(second.render_fragment("page.html", "b", vars).await?, "hi");
    assert_eq!(store.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_template_response_with_processors() -> Result<(), Error> {
    let loader = CountingLoader::new(&[(
        "page.html",
        "{{ user }}@{{ request.url.path }}{% include \"footer.html\" ignore missing %}",
    )]);
    let templates = templates(loader).context_processor(|_: &dyn RequestLike| {
        HashMap::from([("user".to_string(), Value::String("lev".into()))])
    });

    let first = templates
        .template_response(&Request::get("/a"), "page.html", HashMap::new())
        .await?;
    let second = templates
        .template_response(&Request::get("/b"), "page.html", HashMap::new())
        .await?;

    assert_eq!(first.text(), "lev@/a");
    assert_eq!(second.text(), "lev@/b");
    assert_eq!(templates.context_cache().len(), 2);

    Ok(())
}

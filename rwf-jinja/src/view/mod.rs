//! Templates and the caches around them.
//!
//! Templates use the Jinja syntax and are compiled once into code that
//! renders asynchronously, so `extends`, `include` and `import` can load
//! other templates without blocking.
//!
//! # Example
//!
//! ```
//! # use rwf_jinja::view::*;
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Error> {
//! let environment = Environment::default();
//! let template = environment.from_string("<h1>{{ title }}</h1>", None)?;
//!
//! let rendered = template
//!     .render(&[("title".to_string(), "Hello from Rwf!".to_template_value()?)].into())
//!     .await?;
//!
//! assert_eq!(rendered, "<h1>Hello from Rwf!</h1>");
//! # Ok(())
//! # }
//! ```
pub mod bccache;
pub mod cache;
pub mod environment;
pub mod loader;
pub mod response;
pub mod template;
pub mod templates;

pub use bccache::{BytecodeCache, RemoteBytecodeCache};
pub use environment::{Environment, EnvironmentBuilder};
pub use loader::{ChoiceLoader, DictLoader, FileSystemLoader, FunctionLoader, Loader};
pub use response::{Request, RequestLike, Response};
pub use template::{Context, Error, Template};
pub use templates::{ContextProcessor, Templates};

pub use template::{ToTemplateValue, Value};

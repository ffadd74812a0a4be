//! Asynchronous Jinja templates for Rust web apps.
//!
//! Templates are compiled once, cached in memory and, optionally, in a shared bytecode cache,
//! so other processes skip the compilation step too. Rendering is asynchronous: loading a parent
//! template for `extends`, or another template for `include` and `import`, never blocks the executor.
//!
//! # Getting started
//!
//! ```bash
//! cargo add rwf-jinja
//! cargo add tokio@1 --features full
//! ```
//!
//! All the commonly used types can be imported at once:
//!
//! ```
//! use rwf_jinja::prelude::*;
//! ```
//!
//! ### Rendering templates
//!
//! [`view::Templates`] loads templates from a directory and renders them for HTTP responses:
//!
//! ```rust,ignore
//! use rwf_jinja::prelude::*;
//! use std::collections::HashMap;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     Logger::init();
//!
//!     let templates = Templates::new("templates");
//!     let response = templates
//!         .template_response(&Request::get("/"), "index.html", HashMap::new())
//!         .await?;
//!
//!     println!("{}", response.text());
//!     Ok(())
//! }
//! ```
//!
//! ### Fragments
//!
//! A single block can be rendered on its own, which is handy for partial page updates:
//!
//! ```rust,ignore
//! let nav = templates.render_fragment("layout.html", "nav", HashMap::new()).await?;
//! ```
//!
//! Block render functions and the output of context processors are cached, see [`view::cache`].
//!
//! ### Configuration
//!
//! Settings are read from `rwf.toml`, see [`config`].
pub mod config;
pub mod error;
pub mod logging;
pub mod prelude;
pub mod view;

/// Wrapper around async traits to make them easy to use.
pub use async_trait::async_trait;
/// Serde is used for (de)serialization.
pub use serde;
/// Tokio is an asynchronous runtime for Rust.
pub use tokio;

/// Remove unsafe characters from a string printed
/// inside an HTML template.
pub fn escape_html(string: &str) -> String {
    let mut escaped = String::with_capacity(string.len());

    for c in string.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&#34;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }

    escaped
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html("<a href=\"/\">Tom & 'Jerry'</a>"),
            "&lt;a href=&#34;/&#34;&gt;Tom &amp; &#39;Jerry&#39;&lt;/a&gt;"
        );
        assert_eq!(escape_html("plain"), "plain");
    }
}

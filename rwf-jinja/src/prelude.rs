//! Types and traits needed to render templates.
//!
//! ```
//! use rwf_jinja::prelude::*;
//! ```
pub use crate::config::Config;
pub use crate::error::Error;
pub use crate::logging::Logger;
pub use crate::view::{
    Environment, FileSystemLoader, Loader, Request, RequestLike, Response, Template, Templates,
    ToTemplateValue, Value,
};

/// A macro to easily implement async traits methods.
pub use async_trait::async_trait;

pub use tokio;

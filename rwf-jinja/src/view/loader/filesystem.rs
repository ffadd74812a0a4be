use super::{Loader, Source, UpToDate};
use crate::view::environment::Environment;
use crate::view::template::Error;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::fs::{metadata, read_dir, read_to_string};

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

/// Loads templates from directories on disk.
///
/// Directories are searched in order; the first one containing the
/// template wins. Template names always use `/` as separator.
#[derive(Debug, Clone)]
pub struct FileSystemLoader {
    search_path: Vec<PathBuf>,
}

impl FileSystemLoader {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self::with_search_path([path])
    }

    pub fn with_search_path(paths: impl IntoIterator<Item = impl AsRef<Path>>) -> Self {
        Self {
            search_path: paths
                .into_iter()
                .map(|path| path.as_ref().to_owned())
                .collect(),
        }
    }

    pub fn search_path(&self) -> &[PathBuf] {
        &self.search_path
    }

    // Names can't escape the search path.
    fn split(name: &str) -> Option<Vec<&str>> {
        let pieces = name
            .split('/')
            .filter(|piece| !piece.is_empty() && *piece != ".")
            .collect::<Vec<_>>();

        if pieces.iter().any(|piece| *piece == "..") {
            None
        } else {
            Some(pieces)
        }
    }
}

async fn modified(path: &Path) -> Option<SystemTime> {
    metadata(path).await.ok()?.modified().ok()
}

#[async_trait]
impl Loader for FileSystemLoader {
    async fn get_source(&self, _environment: &Environment, name: &str) -> Result<Source, Error> {
        let pieces = Self::split(name).ok_or_else(|| Error::TemplateNotFound(name.to_string()))?;

        for directory in &self.search_path {
            let path = pieces
                .iter()
                .fold(directory.clone(), |path, piece| path.join(piece));

            let source = match read_to_string(&path).await {
                Ok(source) => source,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };

            let mtime = modified(&path).await;
            let watched = path.clone();
            let uptodate: UpToDate = Arc::new(move || {
                let watched = watched.clone();
                async move { modified(&watched).await == mtime && mtime.is_some() }.boxed()
            });

            return Ok(Source::new(source)
                .filename(path.display())
                .uptodate(uptodate));
        }

        Err(Error::TemplateNotFound(name.to_string()))
    }

    async fn list_templates(&self) -> Result<Vec<String>, Error> {
        let mut found = vec![];

        for directory in &self.search_path {
            let mut pending = vec![directory.clone()];

            while let Some(next) = pending.pop() {
                let mut entries = match read_dir(&next).await {
                    Ok(entries) => entries,
                    Err(_) => continue,
                };

                while let Some(entry) = entries.next_entry().await? {
                    let path = entry.path();

                    if entry.file_type().await?.is_dir() {
                        pending.push(path);
                    } else if let Ok(relative) = path.strip_prefix(directory) {
                        let name = relative
                            .components()
                            .map(|c| c.as_os_str().to_string_lossy().to_string())
                            .collect::<Vec<_>>()
                            .join("/");

                        if !found.contains(&name) {
                            found.push(name);
                        }
                    }
                }
            }
        }

        found.sort();
        Ok(found)
    }
}

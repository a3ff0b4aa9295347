//! Section markup, fetched once and then served from the cache.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::cache::{LocalCache, Partition};
use crate::errors::AppError;

/// Where section markup comes from.
#[async_trait]
pub trait TemplateSource: Send + Sync {
    async fn fetch_section_template(&self, template: &str) -> Result<String, AppError>;
}

/// Reads `<dir>/<template>.html`.
pub struct FileTemplateSource {
    dir: PathBuf,
}

impl FileTemplateSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl TemplateSource for FileTemplateSource {
    async fn fetch_section_template(&self, template: &str) -> Result<String, AppError> {
        let path = self.dir.join(format!("{}.html", template));
        match tokio::fs::read_to_string(&path).await {
            Ok(markup) => Ok(markup),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(AppError::NotFound(
                format!("Section template {} not found", template),
            )),
            Err(e) => Err(AppError::Internal(format!(
                "Reading template {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

/// Template fetcher backed by the section content partition.
#[derive(Clone)]
pub struct SectionTemplates {
    source: Arc<dyn TemplateSource>,
    cache: LocalCache,
}

impl SectionTemplates {
    pub fn new(source: Arc<dyn TemplateSource>, cache: LocalCache) -> Self {
        Self { source, cache }
    }

    /// Cached markup if present, otherwise fetch and remember it.
    pub async fn get(&self, template: &str) -> Result<String, AppError> {
        match self
            .cache
            .get::<String>(Partition::SectionContent, template)
            .await
        {
            Ok(Some(entry)) => return Ok(entry.payload),
            Ok(None) => {}
            Err(e) => tracing::warn!("Template cache read failed for {}: {}", template, e),
        }

        let markup = self.source.fetch_section_template(template).await?;
        if let Err(e) = self
            .cache
            .put(Partition::SectionContent, template, &markup)
            .await
        {
            tracing::warn!("Template cache write failed for {}: {}", template, e);
        }
        Ok(markup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{open_cache, CURRENT_SCHEMA_VERSION};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    struct CountingSource(AtomicU32);

    #[async_trait]
    impl TemplateSource for CountingSource {
        async fn fetch_section_template(&self, template: &str) -> Result<String, AppError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(format!("<section id=\"{}\"></section>", template))
        }
    }

    #[tokio::test]
    async fn test_template_fetched_once() {
        let temp_dir = TempDir::new().unwrap();
        let cache = open_cache(&temp_dir.path().join("cache.sqlite"), CURRENT_SCHEMA_VERSION)
            .await
            .unwrap();
        let source = Arc::new(CountingSource(AtomicU32::new(0)));
        let templates = SectionTemplates::new(source.clone(), cache);

        let first = templates.get("sanitarie").await.unwrap();
        let second = templates.get("sanitarie").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(source.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_file_source_missing_template() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("contatti.html"), "<div>contatti</div>").unwrap();
        let source = FileTemplateSource::new(temp_dir.path());

        assert_eq!(
            source.fetch_section_template("contatti").await.unwrap(),
            "<div>contatti</div>"
        );
        assert!(matches!(
            source.fetch_section_template("nope").await,
            Err(AppError::NotFound(_))
        ));
    }
}

use std::{collections::HashMap, sync::Arc};

use futures::future::join_all;
use tracing::{debug, info};

use crate::{
    Error,
    config::internal::ProviderOptions,
    proxy::{AnyOutboundHandler, converters::OutboundBuilder, provider},
};

/// Owns every configured provider, addressed by tag.
pub struct OutboundManager {
    providers: Vec<Arc<provider::Handler>>,
    by_tag: HashMap<String, usize>,
}

impl OutboundManager {
    pub fn new(
        providers: Vec<ProviderOptions>,
        builder: Arc<dyn OutboundBuilder>,
    ) -> Result<Self, Error> {
        let mut handlers = Vec::with_capacity(providers.len());
        let mut by_tag = HashMap::with_capacity(providers.len());

        for opts in providers {
            if by_tag.contains_key(&opts.tag) {
                return Err(Error::InvalidConfig(format!(
                    "duplicate provider tag: {}",
                    opts.tag
                )));
            }
            debug!("loading provider {} with policy {}", opts.tag, opts.policy);
            by_tag.insert(opts.tag.clone(), handlers.len());
            handlers.push(Arc::new(provider::Handler::new(opts, builder.clone())?));
        }

        Ok(Self {
            providers: handlers,
            by_tag,
        })
    }

    /// Starts every provider concurrently.
    pub async fn start(&self) {
        join_all(self.providers.iter().map(|p| p.start())).await;
        info!("{} providers started", self.providers.len());
    }

    pub fn get_provider(&self, tag: &str) -> Option<Arc<provider::Handler>> {
        self.by_tag.get(tag).map(|i| self.providers[*i].clone())
    }

    pub fn get_outbound(&self, tag: &str) -> Option<AnyOutboundHandler> {
        self.get_provider(tag).map(|p| p as AnyOutboundHandler)
    }

    /// Providers in configuration order.
    pub fn providers(&self) -> Vec<Arc<provider::Handler>> {
        self.providers.clone()
    }

    pub async fn close(&self) {
        join_all(self.providers.iter().map(|p| p.close())).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::def::{Listable, ProviderDef},
        proxy::{OutboundType, converters::DefaultOutboundBuilder},
    };

    fn file_provider(tag: &str, path: &std::path::Path) -> ProviderOptions {
        let def = ProviderDef {
            tag: tag.to_owned(),
            provider_type: "file".to_owned(),
            path: Listable::One(path.to_string_lossy().into_owned()),
            policy: "select".to_owned(),
            ..Default::default()
        };
        ProviderOptions::try_from_def(def, std::path::Path::new("/cache")).unwrap()
    }

    #[tokio::test]
    async fn test_manager_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub.json");
        std::fs::write(
            &path,
            r#"[{"type":"socks","tag":"A","server":"10.0.0.1","server_port":1080}]"#,
        )
        .unwrap();

        let manager = OutboundManager::new(
            vec![file_provider("one", &path), file_provider("two", &path)],
            Arc::new(DefaultOutboundBuilder),
        )
        .unwrap();
        manager.start().await;

        let names: Vec<String> = manager
            .providers()
            .iter()
            .map(|p| p.as_map()["name"].as_str().unwrap_or_default().to_owned())
            .collect();
        assert_eq!(names, vec!["one", "two"]);

        let one = manager.get_outbound("one").unwrap();
        assert_eq!(one.proto(), OutboundType::Provider);
        assert_eq!(manager.get_provider("two").unwrap().all(), vec!["A"]);
        assert!(manager.get_outbound("three").is_none());

        manager.close().await;
    }

    #[test]
    fn test_duplicate_tags_rejected() {
        let path = std::path::Path::new("/nonexistent/sub.json");
        let err = OutboundManager::new(
            vec![file_provider("one", path), file_provider("one", path)],
            Arc::new(DefaultOutboundBuilder),
        )
        .err()
        .unwrap();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }
}

//! Batch processing: group, reconcile, enrich, dispatch.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, info};

use super::debounce::BatchProcessor;
use super::enrichment::{Enricher, EnrichmentConfig};
use super::grouping::{Reconciler, SeriesGroup, group_events};
use crate::Result;
use crate::config::ConfigService;
use crate::domain::RawLibraryEvent;
use crate::emby::MediaSource;
use crate::notification::Dispatcher;

pub struct LibraryPipeline {
    config: Arc<ConfigService>,
    source: Arc<dyn MediaSource>,
    dispatcher: Arc<Dispatcher>,
}

impl LibraryPipeline {
    pub fn new(
        config: Arc<ConfigService>,
        source: Arc<dyn MediaSource>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            config,
            source,
            dispatcher,
        }
    }

    async fn notify_group(&self, enricher: &Enricher, group: &SeriesGroup) {
        let unit = enricher.enrich(group).await;
        let results = self.dispatcher.broadcast(&unit).await;
        let delivered = results.iter().filter(|r| r.success).count();
        info!(
            title = %unit.title,
            events = group.events.len(),
            delivered,
            channels = results.len(),
            "Library notification sent"
        );
    }
}

#[async_trait]
impl BatchProcessor for LibraryPipeline {
    async fn process(&self, batch: Vec<RawLibraryEvent>) -> Result<()> {
        let config = self.config.snapshot();
        if !config.features.enable_library_notify {
            debug!(events = batch.len(), "Library notifications disabled, batch dropped");
            return Ok(());
        }

        let mut groups = group_events(batch);
        Reconciler::new(
            self.source.clone(),
            config.library.cluster_gap(),
            config.library.episode_lookup_limit,
        )
        .reconcile(&mut groups)
        .await;

        let enricher = Enricher::new(
            self.source.clone(),
            EnrichmentConfig {
                retry: config.library.retry.clone(),
                placeholder_poster_url: config.library.placeholder_poster_url.clone(),
                public_base: config.emby.public_base(),
            },
        );

        debug!(groups = groups.len(), "Processing library batch");
        join_all(groups.iter().map(|group| self.notify_group(&enricher, group))).await;
        Ok(())
    }
}

//! Removal set computation.
//!
//! A live ledger row is a removal candidate when
//!
//! 1. its content no longer exists in the repository,
//! 2. its folder was marked moved, no longer contains the content, or left the
//!    site's folder tree, or
//! 3. the content's current workflow valid flag is one of the unpublish flags.
//!
//! Candidates are returned in ascending reference id order so that repeated runs
//! over an unchanged state yield identical output.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::UnpublishConfig;
use crate::constants::FOLDER_MOVED_SENTINEL;
use crate::error::PublisherResult;
use crate::models::{SiteItem, SiteItemQuery, UnpublishInfo};
use crate::repository::ContentRepository;
use crate::tracking::StatusTracker;

/// Why a live item must be removed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnpublishReason {
    ContentMissing,
    FolderMoved,
    NotInFolderTree,
    RetiredFlag,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnpublishCandidate {
    pub site_item: SiteItem,
    pub reason: UnpublishReason,
}

impl UnpublishCandidate {
    pub fn reference_id(&self) -> i64 {
        self.site_item.reference_id
    }
}

/// Scope of one resolution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnpublishRequest {
    pub site_id: i64,
    pub pub_server_id: Option<i64>,
    pub delivery_context_id: Option<i64>,
    /// Overrides `unpublish.unpublish_flags` when set
    pub unpublish_flags: Option<Vec<String>>,
}

impl UnpublishRequest {
    pub fn for_site(site_id: i64, pub_server_id: Option<i64>) -> Self {
        Self {
            site_id,
            pub_server_id,
            ..Default::default()
        }
    }

    pub fn with_flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unpublish_flags = Some(flags.into_iter().map(Into::into).collect());
        self
    }
}

#[derive(Clone)]
pub struct UnpublishResolver {
    tracker: StatusTracker,
    repository: Arc<dyn ContentRepository>,
    config: UnpublishConfig,
}

impl UnpublishResolver {
    pub fn new(
        tracker: StatusTracker,
        repository: Arc<dyn ContentRepository>,
        config: UnpublishConfig,
    ) -> Self {
        Self {
            tracker,
            repository,
            config,
        }
    }

    /// Reference ids of live items that must be unpublished, ascending
    pub async fn resolve(&self, request: &UnpublishRequest) -> PublisherResult<Vec<i64>> {
        Ok(self
            .resolve_candidates(request)
            .await?
            .iter()
            .map(UnpublishCandidate::reference_id)
            .collect())
    }

    /// Removal candidates with the first reason that disqualified each one
    pub async fn resolve_candidates(
        &self,
        request: &UnpublishRequest,
    ) -> PublisherResult<Vec<UnpublishCandidate>> {
        let query = SiteItemQuery {
            delivery_context_id: request.delivery_context_id,
            ..SiteItemQuery::for_server(request.site_id, request.pub_server_id)
        };
        let mut live: Vec<SiteItem> = self
            .tracker
            .find_site_items(&query)
            .await?
            .into_iter()
            .filter(SiteItem::is_live)
            .collect();
        live.sort_by_key(|item| item.reference_id);
        if live.is_empty() {
            return Ok(Vec::new());
        }

        let content_ids: Vec<i64> = live
            .iter()
            .map(|item| item.content_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let existing = self.repository.existing_content_ids(&content_ids).await?;
        let (parents, site_folders) = if self.config.check_folders {
            (
                Some(self.repository.parent_folders(&content_ids).await?),
                Some(self.repository.site_folder_ids(request.site_id).await?),
            )
        } else {
            (None, None)
        };
        let flags = self.repository.valid_flags(&content_ids).await?;
        let unpublish_flags: HashSet<String> = request
            .unpublish_flags
            .as_ref()
            .unwrap_or(&self.config.unpublish_flags)
            .iter()
            .map(|flag| flag.to_ascii_lowercase())
            .collect();

        let mut candidates = Vec::new();
        for item in live {
            let reason = if !existing.contains(&item.content_id) {
                Some(UnpublishReason::ContentMissing)
            } else if item.folder_id == Some(FOLDER_MOVED_SENTINEL) {
                Some(UnpublishReason::FolderMoved)
            } else if let (Some(parents), Some(site_folders)) = (&parents, &site_folders) {
                let containing = parents.get(&item.content_id);
                let reachable = match item.folder_id {
                    Some(folder_id) => {
                        containing.map_or(false, |folders| folders.contains(&folder_id))
                            && site_folders.contains(&folder_id)
                    }
                    None => containing.map_or(false, |folders| {
                        folders.iter().any(|folder| site_folders.contains(folder))
                    }),
                };
                (!reachable).then_some(UnpublishReason::NotInFolderTree)
            } else {
                None
            };

            let reason = reason.or_else(|| {
                flags
                    .get(&item.content_id)
                    .filter(|flag| unpublish_flags.contains(&flag.to_ascii_lowercase()))
                    .map(|_| UnpublishReason::RetiredFlag)
            });

            if let Some(reason) = reason {
                debug!(
                    reference_id = item.reference_id,
                    content_id = item.content_id,
                    reason = ?reason,
                    "Unpublish candidate"
                );
                candidates.push(UnpublishCandidate {
                    site_item: item,
                    reason,
                });
            }
        }

        info!(
            site_id = request.site_id,
            pub_server_id = request.pub_server_id,
            candidates = candidates.len(),
            "Resolved unpublish candidates"
        );
        Ok(candidates)
    }

    /// Delivery data of the live rendition at one exact (content, context, template,
    /// site, server, location) key, newest first
    pub async fn find_unpublish_info(
        &self,
        content_id: i64,
        delivery_context_id: i64,
        template_id: Option<i64>,
        site_id: i64,
        pub_server_id: Option<i64>,
        location: Option<&str>,
    ) -> PublisherResult<Option<UnpublishInfo>> {
        let query = SiteItemQuery {
            site_id: Some(site_id),
            pub_server_id,
            exact_server: true,
            delivery_context_id: Some(delivery_context_id),
            content_id: Some(content_id),
            template_id,
            location: location.map(str::to_string),
            folder_ids: None,
        };
        let items = self.tracker.find_site_items(&query).await?;
        Ok(items
            .iter()
            .filter(|item| item.is_live())
            .max_by_key(|item| item.reference_id)
            .map(UnpublishInfo::from))
    }

    /// Replace the folder of every ledger row in `folder_ids` with the moved sentinel
    pub async fn mark_folder_ids_for_moved_folders(
        &self,
        folder_ids: &[i64],
    ) -> PublisherResult<u64> {
        if folder_ids.is_empty() {
            return Ok(0);
        }
        let marked = self.tracker.store().mark_folders_moved(folder_ids).await?;
        info!(folders = folder_ids.len(), marked, "Marked site items of moved folders");
        Ok(marked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_flag_override() {
        let request = UnpublishRequest::for_site(3, Some(9)).with_flags(["u", "x"]);
        assert_eq!(request.site_id, 3);
        assert_eq!(request.pub_server_id, Some(9));
        assert_eq!(
            request.unpublish_flags,
            Some(vec!["u".to_string(), "x".to_string()])
        );
    }
}

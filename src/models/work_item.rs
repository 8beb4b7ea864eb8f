//! Work items produced by a content list run, before reference ids are assigned.

use serde::{Deserialize, Serialize};

use super::pub_item::{Operation, PublishItem};

/// One (content, template) unit of work produced by the content list engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentListItem {
    pub content_id: i64,
    pub revision_id: i64,
    pub folder_id: Option<i64>,
    pub template_id: Option<i64>,
    pub site_id: i64,
    pub pub_server_id: Option<i64>,
    pub delivery_context_id: i64,
    pub operation: Operation,
    pub location: Option<String>,
    pub delivery_type: Option<String>,
    pub unpublish_ref_id: Option<i64>,
    pub unpublish_info: Option<serde_json::Value>,
}

impl ContentListItem {
    /// Bind the item to a job and the reference id allocated for it
    pub fn into_publish_item(
        self,
        job_id: i64,
        reference_id: i64,
        assembly_context_id: Option<i64>,
    ) -> PublishItem {
        PublishItem {
            reference_id,
            job_id,
            site_id: self.site_id,
            pub_server_id: self.pub_server_id,
            content_id: self.content_id,
            revision_id: self.revision_id,
            folder_id: self.folder_id,
            template_id: self.template_id,
            delivery_context_id: self.delivery_context_id,
            assembly_context_id,
            operation: self.operation,
            location: self.location,
            delivery_type: self.delivery_type,
            unpublish_ref_id: self.unpublish_ref_id,
            unpublish_info: self.unpublish_info,
        }
    }

    /// The identity used by idempotence comparisons
    pub fn content_template(&self) -> (i64, Option<i64>) {
        (self.content_id, self.template_id)
    }
}

/// Materialized result of one content list run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentListResults {
    pub content_list_id: i64,
    pub content_list_name: String,
    pub publish: bool,
    /// Candidates produced by the generator (or legacy query)
    pub generated_count: usize,
    /// Candidates remaining after the item filter
    pub filtered_count: usize,
    pub items: Vec<ContentListItem>,
}

impl ContentListResults {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

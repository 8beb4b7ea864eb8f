//! # PostgreSQL Publishing Store
//!
//! sqlx-backed [`PublishingStore`] over the tables created by `migrations/`.
//!
//! ## Ledger writes
//!
//! [`PgStore::record_item_events`] runs one transaction per batch. For each event it
//! upserts the item log rows, takes a transaction-scoped advisory lock per ledger key
//! (in key order), reads the ledger row with `SELECT ... FOR UPDATE`, folds the event
//! with [`fold_site_item`](crate::ledger::fold_site_item) and writes the result back.
//! Concurrent jobs touching the same key serialize on the advisory lock, even when
//! the key has no ledger row yet.
//!
//! ## Read isolation
//!
//! PostgreSQL never exposes uncommitted rows, so this store reports
//! `supports_read_uncommitted() == false` and serves every ledger read strictly.

use std::collections::BTreeSet;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::{debug, info};

use super::{PublishingStore, PurgeSummary, RecordSummary};
use crate::config::DatabaseConfig;
use crate::constants::FOLDER_MOVED_SENTINEL;
use crate::error::{PublisherError, PublisherResult};
use crate::ledger::{fold_site_item, LedgerDecision, LedgerEvent};
use crate::models::{
    ContentList, DeliveryType, Edition, EditionContentList, EditionTaskDef, EditionTaskLog,
    ItemCounts, NewContentList, NewDeliveryType, NewEdition, NewEditionTaskDef,
    NewEditionTaskLog, ParameterMap, Priority, PubItemStatus, PubStatus, PubStatusFilter,
    PublishedItem, ReadMode, SiteItem, SiteItemQuery,
};

const CONTENT_LIST_COLUMNS: &str = "content_list_id, name, description, list_type, generator, \
     generator_params, expander, expander_params, filter, url";
const EDITION_COLUMNS: &str = "edition_id, name, display_title, edition_type, site_id, \
     pub_server_id, priority, comment, continue_on_failure";
const PUB_STATUS_COLUMNS: &str = "status_id, edition_id, pub_server_id, start_date, end_date, \
     ending_state, delivered_count, removed_count, failed_count, hidden, server_identity";
const ITEM_STATUS_COLUMNS: &str = "reference_id, job_id, site_id, pub_server_id, content_id, \
     revision_id, folder_id, template_id, delivery_context_id, operation, status, location, \
     delivery_type, elapsed_ms, message, unpublish_ref_id, updated_at";
const SITE_ITEM_COLUMNS: &str = "reference_id, site_id, pub_server_id, content_id, revision_id, \
     folder_id, template_id, delivery_context_id, location, delivery_type, operation, status, \
     job_id, job_started_at, published_at, unpublish_info";

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a pool sized from configuration, optionally applying migrations
    pub async fn connect(config: &DatabaseConfig) -> PublisherResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .connect(&config.url)
            .await?;
        let store = Self::new(pool);
        if config.run_migrations {
            store.migrate().await?;
        }
        Ok(store)
    }

    pub async fn migrate(&self) -> PublisherResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| PublisherError::Database(format!("Migration failed: {e}")))?;
        info!("Publishing schema migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn parse<T: FromStr<Err = String>>(value: String) -> PublisherResult<T> {
    T::from_str(&value).map_err(PublisherError::Database)
}

fn unique_violation(err: sqlx::Error, entity: &str, name: &str) -> PublisherError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            PublisherError::duplicate_name(entity, name)
        }
        _ => err.into(),
    }
}

fn content_list_from_row(row: &PgRow) -> PublisherResult<ContentList> {
    Ok(ContentList {
        content_list_id: row.try_get("content_list_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        list_type: parse(row.try_get("list_type")?)?,
        generator: row.try_get("generator")?,
        generator_params: row.try_get::<Json<ParameterMap>, _>("generator_params")?.0,
        expander: row.try_get("expander")?,
        expander_params: row.try_get::<Json<ParameterMap>, _>("expander_params")?.0,
        filter: row.try_get("filter")?,
        url: row.try_get("url")?,
    })
}

fn edition_from_row(row: &PgRow) -> PublisherResult<Edition> {
    let ordinal: i32 = row.try_get("priority")?;
    Ok(Edition {
        edition_id: row.try_get("edition_id")?,
        name: row.try_get("name")?,
        display_title: row.try_get("display_title")?,
        edition_type: parse(row.try_get("edition_type")?)?,
        site_id: row.try_get("site_id")?,
        pub_server_id: row.try_get("pub_server_id")?,
        priority: Priority::from_ordinal(ordinal).unwrap_or_default(),
        comment: row.try_get("comment")?,
        continue_on_failure: row.try_get("continue_on_failure")?,
    })
}

fn edition_list_from_row(row: &PgRow) -> PublisherResult<EditionContentList> {
    Ok(EditionContentList {
        edition_id: row.try_get("edition_id")?,
        content_list_id: row.try_get("content_list_id")?,
        sequence: row.try_get("sequence")?,
        delivery_context_id: row.try_get("delivery_context_id")?,
        assembly_context_id: row.try_get("assembly_context_id")?,
        auth_type: row.try_get("auth_type")?,
    })
}

fn task_def_from_row(row: &PgRow) -> PublisherResult<EditionTaskDef> {
    Ok(EditionTaskDef {
        task_id: row.try_get("task_id")?,
        edition_id: row.try_get("edition_id")?,
        sequence: row.try_get("sequence")?,
        extension_name: row.try_get("extension_name")?,
        params: row.try_get::<Json<ParameterMap>, _>("params")?.0,
        continue_on_failure: row.try_get("continue_on_failure")?,
    })
}

fn delivery_type_from_row(row: &PgRow) -> PublisherResult<DeliveryType> {
    Ok(DeliveryType {
        delivery_type_id: row.try_get("delivery_type_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        bean_name: row.try_get("bean_name")?,
        unpublishing_requires_assembly: row.try_get("unpublishing_requires_assembly")?,
    })
}

fn pub_status_from_row(row: &PgRow) -> PublisherResult<PubStatus> {
    Ok(PubStatus {
        status_id: row.try_get("status_id")?,
        edition_id: row.try_get("edition_id")?,
        pub_server_id: row.try_get("pub_server_id")?,
        start_date: row.try_get("start_date")?,
        end_date: row.try_get("end_date")?,
        ending_state: parse(row.try_get("ending_state")?)?,
        delivered_count: row.try_get("delivered_count")?,
        removed_count: row.try_get("removed_count")?,
        failed_count: row.try_get("failed_count")?,
        hidden: row.try_get("hidden")?,
        server_identity: row.try_get("server_identity")?,
    })
}

fn item_status_from_row(row: &PgRow) -> PublisherResult<PubItemStatus> {
    Ok(PubItemStatus {
        reference_id: row.try_get("reference_id")?,
        job_id: row.try_get("job_id")?,
        site_id: row.try_get("site_id")?,
        pub_server_id: row.try_get("pub_server_id")?,
        content_id: row.try_get("content_id")?,
        revision_id: row.try_get("revision_id")?,
        folder_id: row.try_get("folder_id")?,
        template_id: row.try_get("template_id")?,
        delivery_context_id: row.try_get("delivery_context_id")?,
        operation: parse(row.try_get("operation")?)?,
        status: parse(row.try_get("status")?)?,
        location: row.try_get("location")?,
        delivery_type: row.try_get("delivery_type")?,
        elapsed_ms: row.try_get("elapsed_ms")?,
        message: row.try_get("message")?,
        unpublish_ref_id: row.try_get("unpublish_ref_id")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn site_item_from_row(row: &PgRow) -> PublisherResult<SiteItem> {
    Ok(SiteItem {
        reference_id: row.try_get("reference_id")?,
        site_id: row.try_get("site_id")?,
        pub_server_id: row.try_get("pub_server_id")?,
        content_id: row.try_get("content_id")?,
        revision_id: row.try_get("revision_id")?,
        folder_id: row.try_get("folder_id")?,
        template_id: row.try_get("template_id")?,
        delivery_context_id: row.try_get("delivery_context_id")?,
        location: row.try_get("location")?,
        delivery_type: row.try_get("delivery_type")?,
        operation: parse(row.try_get("operation")?)?,
        status: parse(row.try_get("status")?)?,
        job_id: row.try_get("job_id")?,
        job_started_at: row.try_get("job_started_at")?,
        published_at: row.try_get("published_at")?,
        unpublish_info: row.try_get("unpublish_info")?,
    })
}

fn task_log_from_row(row: &PgRow) -> PublisherResult<EditionTaskLog> {
    Ok(EditionTaskLog {
        reference_id: row.try_get("reference_id")?,
        job_id: row.try_get("job_id")?,
        edition_id: row.try_get("edition_id")?,
        task_id: row.try_get("task_id")?,
        elapsed_ms: row.try_get("elapsed_ms")?,
        success: row.try_get("success")?,
        message: row.try_get("message")?,
        logged_at: row.try_get("logged_at")?,
    })
}

fn upsert_item_status<'a>(
    builder: &mut QueryBuilder<'a, Postgres>,
    rows: impl IntoIterator<Item = &'a PubItemStatus>,
) {
    builder.push(format!("INSERT INTO publisher_pub_item_status ({ITEM_STATUS_COLUMNS}) "));
    builder.push_values(rows, |mut b, row| {
        b.push_bind(row.reference_id)
            .push_bind(row.job_id)
            .push_bind(row.site_id)
            .push_bind(row.pub_server_id)
            .push_bind(row.content_id)
            .push_bind(row.revision_id)
            .push_bind(row.folder_id)
            .push_bind(row.template_id)
            .push_bind(row.delivery_context_id)
            .push_bind(row.operation.as_str())
            .push_bind(row.status.as_str())
            .push_bind(row.location.as_deref())
            .push_bind(row.delivery_type.as_deref())
            .push_bind(row.elapsed_ms)
            .push_bind(row.message.as_deref())
            .push_bind(row.unpublish_ref_id)
            .push_bind(row.updated_at);
    });
    builder.push(
        " ON CONFLICT (reference_id) DO UPDATE SET status = EXCLUDED.status, \
         location = EXCLUDED.location, elapsed_ms = EXCLUDED.elapsed_ms, \
         message = EXCLUDED.message, updated_at = EXCLUDED.updated_at \
         WHERE publisher_pub_item_status.status NOT IN ('SUCCESS', 'FAILURE') \
         OR EXCLUDED.status IN ('SUCCESS', 'FAILURE')",
    );
}

#[async_trait]
impl PublishingStore for PgStore {
    async fn create_content_list(&self, new_list: NewContentList) -> PublisherResult<ContentList> {
        let row = sqlx::query(&format!(
            "INSERT INTO publisher_content_lists (name, description, list_type, generator, \
             generator_params, expander, expander_params, filter, url) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING {CONTENT_LIST_COLUMNS}"
        ))
        .bind(&new_list.name)
        .bind(&new_list.description)
        .bind(new_list.list_type.as_str())
        .bind(&new_list.generator)
        .bind(Json(&new_list.generator_params))
        .bind(&new_list.expander)
        .bind(Json(&new_list.expander_params))
        .bind(&new_list.filter)
        .bind(&new_list.url)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| unique_violation(e, "content list", &new_list.name))?;
        content_list_from_row(&row)
    }

    async fn save_content_list(&self, list: &ContentList) -> PublisherResult<()> {
        sqlx::query(
            "UPDATE publisher_content_lists SET name = $2, description = $3, list_type = $4, \
             generator = $5, generator_params = $6, expander = $7, expander_params = $8, \
             filter = $9, url = $10 WHERE content_list_id = $1",
        )
        .bind(list.content_list_id)
        .bind(&list.name)
        .bind(&list.description)
        .bind(list.list_type.as_str())
        .bind(&list.generator)
        .bind(Json(&list.generator_params))
        .bind(&list.expander)
        .bind(Json(&list.expander_params))
        .bind(&list.filter)
        .bind(&list.url)
        .execute(&self.pool)
        .await
        .map_err(|e| unique_violation(e, "content list", &list.name))?;
        Ok(())
    }

    async fn load_content_list(
        &self,
        content_list_id: i64,
    ) -> PublisherResult<Option<ContentList>> {
        sqlx::query(&format!(
            "SELECT {CONTENT_LIST_COLUMNS} FROM publisher_content_lists WHERE content_list_id = $1"
        ))
        .bind(content_list_id)
        .fetch_optional(&self.pool)
        .await?
        .map(|row| content_list_from_row(&row))
        .transpose()
    }

    async fn find_content_list_by_name(&self, name: &str) -> PublisherResult<Option<ContentList>> {
        sqlx::query(&format!(
            "SELECT {CONTENT_LIST_COLUMNS} FROM publisher_content_lists WHERE name = $1"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?
        .map(|row| content_list_from_row(&row))
        .transpose()
    }

    async fn list_content_lists(&self) -> PublisherResult<Vec<ContentList>> {
        sqlx::query(&format!(
            "SELECT {CONTENT_LIST_COLUMNS} FROM publisher_content_lists ORDER BY content_list_id"
        ))
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(content_list_from_row)
        .collect()
    }

    async fn delete_content_list(&self, content_list_id: i64) -> PublisherResult<bool> {
        let result = sqlx::query("DELETE FROM publisher_content_lists WHERE content_list_id = $1")
            .bind(content_list_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_edition(&self, new_edition: NewEdition) -> PublisherResult<Edition> {
        let row = sqlx::query(&format!(
            "INSERT INTO publisher_editions (name, display_title, edition_type, site_id, \
             pub_server_id, priority, comment, continue_on_failure) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {EDITION_COLUMNS}"
        ))
        .bind(&new_edition.name)
        .bind(&new_edition.display_title)
        .bind(new_edition.edition_type.as_str())
        .bind(new_edition.site_id)
        .bind(new_edition.pub_server_id)
        .bind(new_edition.priority.ordinal())
        .bind(&new_edition.comment)
        .bind(new_edition.continue_on_failure)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| unique_violation(e, "edition", &new_edition.name))?;
        edition_from_row(&row)
    }

    async fn save_edition(&self, edition: &Edition) -> PublisherResult<()> {
        sqlx::query(
            "UPDATE publisher_editions SET name = $2, display_title = $3, edition_type = $4, \
             site_id = $5, pub_server_id = $6, priority = $7, comment = $8, \
             continue_on_failure = $9 WHERE edition_id = $1",
        )
        .bind(edition.edition_id)
        .bind(&edition.name)
        .bind(&edition.display_title)
        .bind(edition.edition_type.as_str())
        .bind(edition.site_id)
        .bind(edition.pub_server_id)
        .bind(edition.priority.ordinal())
        .bind(&edition.comment)
        .bind(edition.continue_on_failure)
        .execute(&self.pool)
        .await
        .map_err(|e| unique_violation(e, "edition", &edition.name))?;
        Ok(())
    }

    async fn load_edition(&self, edition_id: i64) -> PublisherResult<Option<Edition>> {
        sqlx::query(&format!(
            "SELECT {EDITION_COLUMNS} FROM publisher_editions WHERE edition_id = $1"
        ))
        .bind(edition_id)
        .fetch_optional(&self.pool)
        .await?
        .map(|row| edition_from_row(&row))
        .transpose()
    }

    async fn find_edition_by_name(&self, name: &str) -> PublisherResult<Option<Edition>> {
        sqlx::query(&format!(
            "SELECT {EDITION_COLUMNS} FROM publisher_editions WHERE name = $1"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?
        .map(|row| edition_from_row(&row))
        .transpose()
    }

    async fn list_editions(&self, site_id: Option<i64>) -> PublisherResult<Vec<Edition>> {
        sqlx::query(&format!(
            "SELECT {EDITION_COLUMNS} FROM publisher_editions \
             WHERE ($1::BIGINT IS NULL OR site_id = $1) ORDER BY edition_id"
        ))
        .bind(site_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(edition_from_row)
        .collect()
    }

    async fn delete_edition(&self, edition_id: i64) -> PublisherResult<bool> {
        let result = sqlx::query("DELETE FROM publisher_editions WHERE edition_id = $1")
            .bind(edition_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn save_edition_content_list(
        &self,
        association: &EditionContentList,
    ) -> PublisherResult<()> {
        sqlx::query(
            "INSERT INTO publisher_edition_content_lists (edition_id, content_list_id, sequence, \
             delivery_context_id, assembly_context_id, auth_type) VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (edition_id, content_list_id) DO UPDATE SET sequence = EXCLUDED.sequence, \
             delivery_context_id = EXCLUDED.delivery_context_id, \
             assembly_context_id = EXCLUDED.assembly_context_id, auth_type = EXCLUDED.auth_type",
        )
        .bind(association.edition_id)
        .bind(association.content_list_id)
        .bind(association.sequence)
        .bind(association.delivery_context_id)
        .bind(association.assembly_context_id)
        .bind(association.auth_type)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                PublisherError::Validation(format!(
                    "Edition {} or content list {} does not exist",
                    association.edition_id, association.content_list_id
                ))
            }
            _ => e.into(),
        })?;
        Ok(())
    }

    async fn load_edition_content_lists(
        &self,
        edition_id: i64,
    ) -> PublisherResult<Vec<EditionContentList>> {
        sqlx::query(
            "SELECT edition_id, content_list_id, sequence, delivery_context_id, \
             assembly_context_id, auth_type FROM publisher_edition_content_lists \
             WHERE edition_id = $1 ORDER BY sequence, content_list_id",
        )
        .bind(edition_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(edition_list_from_row)
        .collect()
    }

    async fn delete_edition_content_list(
        &self,
        edition_id: i64,
        content_list_id: i64,
    ) -> PublisherResult<bool> {
        let result = sqlx::query(
            "DELETE FROM publisher_edition_content_lists \
             WHERE edition_id = $1 AND content_list_id = $2",
        )
        .bind(edition_id)
        .bind(content_list_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_task_def(
        &self,
        new_task: NewEditionTaskDef,
    ) -> PublisherResult<EditionTaskDef> {
        let row = sqlx::query(
            "INSERT INTO publisher_edition_tasks (edition_id, sequence, extension_name, params, \
             continue_on_failure) VALUES ($1, $2, $3, $4, $5) \
             RETURNING task_id, edition_id, sequence, extension_name, params, continue_on_failure",
        )
        .bind(new_task.edition_id)
        .bind(new_task.sequence)
        .bind(&new_task.extension_name)
        .bind(Json(&new_task.params))
        .bind(new_task.continue_on_failure)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                PublisherError::EditionMissing(new_task.edition_id.to_string())
            }
            _ => e.into(),
        })?;
        task_def_from_row(&row)
    }

    async fn save_task_def(&self, task: &EditionTaskDef) -> PublisherResult<()> {
        sqlx::query(
            "UPDATE publisher_edition_tasks SET sequence = $2, extension_name = $3, params = $4, \
             continue_on_failure = $5 WHERE task_id = $1",
        )
        .bind(task.task_id)
        .bind(task.sequence)
        .bind(&task.extension_name)
        .bind(Json(&task.params))
        .bind(task.continue_on_failure)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_task_defs(&self, edition_id: i64) -> PublisherResult<Vec<EditionTaskDef>> {
        sqlx::query(
            "SELECT task_id, edition_id, sequence, extension_name, params, continue_on_failure \
             FROM publisher_edition_tasks WHERE edition_id = $1 ORDER BY sequence, task_id",
        )
        .bind(edition_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(task_def_from_row)
        .collect()
    }

    async fn delete_task_def(&self, task_id: i64) -> PublisherResult<bool> {
        let result = sqlx::query("DELETE FROM publisher_edition_tasks WHERE task_id = $1")
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_delivery_type(
        &self,
        new_type: NewDeliveryType,
    ) -> PublisherResult<DeliveryType> {
        let row = sqlx::query(
            "INSERT INTO publisher_delivery_types (name, description, bean_name, \
             unpublishing_requires_assembly) VALUES ($1, $2, $3, $4) \
             RETURNING delivery_type_id, name, description, bean_name, unpublishing_requires_assembly",
        )
        .bind(&new_type.name)
        .bind(&new_type.description)
        .bind(&new_type.bean_name)
        .bind(new_type.unpublishing_requires_assembly)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| unique_violation(e, "delivery type", &new_type.name))?;
        delivery_type_from_row(&row)
    }

    async fn save_delivery_type(&self, delivery_type: &DeliveryType) -> PublisherResult<()> {
        sqlx::query(
            "UPDATE publisher_delivery_types SET name = $2, description = $3, bean_name = $4, \
             unpublishing_requires_assembly = $5 WHERE delivery_type_id = $1",
        )
        .bind(delivery_type.delivery_type_id)
        .bind(&delivery_type.name)
        .bind(&delivery_type.description)
        .bind(&delivery_type.bean_name)
        .bind(delivery_type.unpublishing_requires_assembly)
        .execute(&self.pool)
        .await
        .map_err(|e| unique_violation(e, "delivery type", &delivery_type.name))?;
        Ok(())
    }

    async fn load_delivery_type(
        &self,
        delivery_type_id: i64,
    ) -> PublisherResult<Option<DeliveryType>> {
        sqlx::query(
            "SELECT delivery_type_id, name, description, bean_name, unpublishing_requires_assembly \
             FROM publisher_delivery_types WHERE delivery_type_id = $1",
        )
        .bind(delivery_type_id)
        .fetch_optional(&self.pool)
        .await?
        .map(|row| delivery_type_from_row(&row))
        .transpose()
    }

    async fn find_delivery_type_by_name(
        &self,
        name: &str,
    ) -> PublisherResult<Option<DeliveryType>> {
        sqlx::query(
            "SELECT delivery_type_id, name, description, bean_name, unpublishing_requires_assembly \
             FROM publisher_delivery_types WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?
        .map(|row| delivery_type_from_row(&row))
        .transpose()
    }

    async fn list_delivery_types(&self) -> PublisherResult<Vec<DeliveryType>> {
        sqlx::query(
            "SELECT delivery_type_id, name, description, bean_name, unpublishing_requires_assembly \
             FROM publisher_delivery_types ORDER BY delivery_type_id",
        )
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(delivery_type_from_row)
        .collect()
    }

    async fn delete_delivery_type(&self, delivery_type_id: i64) -> PublisherResult<bool> {
        let result = sqlx::query("DELETE FROM publisher_delivery_types WHERE delivery_type_id = $1")
            .bind(delivery_type_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn allocate_job_id(&self) -> PublisherResult<i64> {
        let id: i64 = sqlx::query_scalar("SELECT nextval('publisher_job_seq')")
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }

    async fn insert_pub_status(&self, status: &PubStatus) -> PublisherResult<()> {
        let mut tx = self.pool.begin().await?;
        let registered = sqlx::query(
            "INSERT INTO publisher_job_registry (job_id) VALUES ($1) ON CONFLICT DO NOTHING",
        )
        .bind(status.status_id)
        .execute(&mut *tx)
        .await?;
        if registered.rows_affected() == 0 {
            return Err(PublisherError::DuplicateJob(status.status_id));
        }

        sqlx::query(&format!(
            "INSERT INTO publisher_pub_status ({PUB_STATUS_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
        ))
        .bind(status.status_id)
        .bind(status.edition_id)
        .bind(status.pub_server_id)
        .bind(status.start_date)
        .bind(status.end_date)
        .bind(status.ending_state.as_str())
        .bind(status.delivered_count)
        .bind(status.removed_count)
        .bind(status.failed_count)
        .bind(status.hidden)
        .bind(&status.server_identity)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn update_pub_status(&self, status: &PubStatus) -> PublisherResult<()> {
        let result = sqlx::query(
            "UPDATE publisher_pub_status SET end_date = $2, ending_state = $3, \
             delivered_count = $4, removed_count = $5, failed_count = $6, hidden = $7, \
             server_identity = $8 WHERE status_id = $1",
        )
        .bind(status.status_id)
        .bind(status.end_date)
        .bind(status.ending_state.as_str())
        .bind(status.delivered_count)
        .bind(status.removed_count)
        .bind(status.failed_count)
        .bind(status.hidden)
        .bind(&status.server_identity)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(PublisherError::JobMissing(status.status_id));
        }
        Ok(())
    }

    async fn load_pub_status(&self, job_id: i64) -> PublisherResult<Option<PubStatus>> {
        sqlx::query(&format!(
            "SELECT {PUB_STATUS_COLUMNS} FROM publisher_pub_status WHERE status_id = $1"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?
        .map(|row| pub_status_from_row(&row))
        .transpose()
    }

    async fn query_pub_status(&self, filter: &PubStatusFilter) -> PublisherResult<Vec<PubStatus>> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT s.status_id, s.edition_id, s.pub_server_id, s.start_date, s.end_date, \
             s.ending_state, s.delivered_count, s.removed_count, s.failed_count, s.hidden, \
             s.server_identity FROM publisher_pub_status s \
             LEFT JOIN publisher_editions e ON e.edition_id = s.edition_id WHERE TRUE",
        );
        if let Some(edition_id) = filter.edition_id {
            builder.push(" AND s.edition_id = ").push_bind(edition_id);
        }
        if let Some(site_id) = filter.site_id {
            builder.push(" AND e.site_id = ").push_bind(site_id);
        }
        if let Some(server_id) = filter.pub_server_id {
            builder.push(" AND s.pub_server_id = ").push_bind(server_id);
        }
        if let Some(state) = filter.ending_state {
            builder.push(" AND s.ending_state = ").push_bind(state.as_str());
        }
        if let Some(identity) = &filter.server_identity {
            builder.push(" AND s.server_identity = ").push_bind(identity.clone());
        }
        if let Some(from) = filter.started_after {
            builder.push(" AND s.start_date >= ").push_bind(from);
        }
        if let Some(to) = filter.started_before {
            builder.push(" AND s.start_date <= ").push_bind(to);
        }
        builder.push(" ORDER BY s.start_date DESC, s.status_id DESC");
        if let Some(max) = filter.max_count {
            builder.push(" LIMIT ").push_bind(max as i64);
        }

        builder
            .build()
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(pub_status_from_row)
            .collect()
    }

    async fn allocate_reference_ids(&self, count: usize) -> PublisherResult<Vec<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT nextval('publisher_reference_seq') FROM generate_series(1, $1)",
        )
        .bind(count as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn insert_item_statuses(&self, rows: &[PubItemStatus]) -> PublisherResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut builder = QueryBuilder::new("");
        upsert_item_status(&mut builder, rows);
        builder.build().execute(&self.pool).await?;
        Ok(())
    }

    async fn record_item_events(&self, events: &[LedgerEvent]) -> PublisherResult<RecordSummary> {
        let mut summary = RecordSummary::default();
        if events.is_empty() {
            return Ok(summary);
        }

        let mut tx = self.pool.begin().await?;

        let mut builder = QueryBuilder::new("");
        upsert_item_status(&mut builder, events.iter().map(|event| &event.row));
        let written = builder.build().execute(&mut *tx).await?;
        summary.log_rows_written = written.rows_affected() as usize;

        // Row locks cannot cover a key that has no row yet; sorted to avoid deadlocks
        let lock_names: BTreeSet<String> =
            events.iter().map(|event| event.key().lock_name()).collect();
        for lock_name in &lock_names {
            sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
                .bind(lock_name)
                .execute(&mut *tx)
                .await?;
        }

        for event in events {
            let key = event.key();
            let existing = sqlx::query(&format!(
                "SELECT {SITE_ITEM_COLUMNS} FROM publisher_site_items \
                 WHERE site_id = $1 AND pub_server_id IS NOT DISTINCT FROM $2 \
                 AND delivery_context_id = $3 AND content_id = $4 \
                 AND location IS NOT DISTINCT FROM $5 FOR UPDATE"
            ))
            .bind(key.site_id)
            .bind(key.pub_server_id)
            .bind(key.delivery_context_id)
            .bind(key.content_id)
            .bind(key.location.as_deref())
            .fetch_optional(&mut *tx)
            .await?
            .map(|row| site_item_from_row(&row))
            .transpose()?;

            match fold_site_item(existing.as_ref(), event) {
                LedgerDecision::Write(item) => {
                    sqlx::query(&format!(
                        "INSERT INTO publisher_site_items ({SITE_ITEM_COLUMNS}) \
                         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16) \
                         ON CONFLICT (site_id, pub_server_id, delivery_context_id, content_id, location) \
                         DO UPDATE SET reference_id = EXCLUDED.reference_id, \
                         revision_id = EXCLUDED.revision_id, folder_id = EXCLUDED.folder_id, \
                         template_id = EXCLUDED.template_id, delivery_type = EXCLUDED.delivery_type, \
                         operation = EXCLUDED.operation, status = EXCLUDED.status, \
                         job_id = EXCLUDED.job_id, job_started_at = EXCLUDED.job_started_at, \
                         published_at = EXCLUDED.published_at, unpublish_info = EXCLUDED.unpublish_info"
                    ))
                    .bind(item.reference_id)
                    .bind(item.site_id)
                    .bind(item.pub_server_id)
                    .bind(item.content_id)
                    .bind(item.revision_id)
                    .bind(item.folder_id)
                    .bind(item.template_id)
                    .bind(item.delivery_context_id)
                    .bind(item.location.as_deref())
                    .bind(item.delivery_type.as_deref())
                    .bind(item.operation.as_str())
                    .bind(item.status.as_str())
                    .bind(item.job_id)
                    .bind(item.job_started_at)
                    .bind(item.published_at)
                    .bind(&item.unpublish_info)
                    .execute(&mut *tx)
                    .await?;
                    summary.ledger_rows_written += 1;
                }
                LedgerDecision::Unchanged(reason) => {
                    debug!(
                        reference_id = event.row.reference_id,
                        job_id = event.row.job_id,
                        ?reason,
                        "Ledger row unchanged"
                    );
                    summary.ledger_rows_unchanged += 1;
                }
            }
        }

        tx.commit().await?;
        Ok(summary)
    }

    async fn load_item_statuses(&self, job_id: i64) -> PublisherResult<Vec<PubItemStatus>> {
        sqlx::query(&format!(
            "SELECT {ITEM_STATUS_COLUMNS} FROM publisher_pub_item_status \
             WHERE job_id = $1 ORDER BY reference_id"
        ))
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(item_status_from_row)
        .collect()
    }

    async fn load_published_items(
        &self,
        job_id: i64,
        after_reference_id: Option<i64>,
        limit: Option<usize>,
    ) -> PublisherResult<Vec<PublishedItem>> {
        let rows = sqlx::query(&format!(
            "SELECT {ITEM_STATUS_COLUMNS} FROM publisher_pub_item_status \
             WHERE job_id = $1 AND ($2::BIGINT IS NULL OR reference_id > $2) \
             ORDER BY reference_id LIMIT $3"
        ))
        .bind(job_id)
        .bind(after_reference_id)
        .bind(limit.map(|l| l as i64))
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(item_status_from_row)
        .collect::<PublisherResult<Vec<_>>>()?;

        let reference_ids: Vec<i64> = rows.iter().map(|row| row.reference_id).collect();
        let site_items = sqlx::query(&format!(
            "SELECT {SITE_ITEM_COLUMNS} FROM publisher_site_items \
             WHERE job_id = $1 AND reference_id = ANY($2)"
        ))
        .bind(job_id)
        .bind(&reference_ids)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(site_item_from_row)
        .collect::<PublisherResult<Vec<_>>>()?;

        Ok(rows
            .into_iter()
            .map(|status| {
                let site_item = site_items
                    .iter()
                    .find(|item| item.reference_id == status.reference_id)
                    .cloned();
                PublishedItem { status, site_item }
            })
            .collect())
    }

    async fn load_item_statuses_for_content(
        &self,
        content_id: i64,
        pub_server_id: Option<i64>,
    ) -> PublisherResult<Vec<PubItemStatus>> {
        sqlx::query(&format!(
            "SELECT {ITEM_STATUS_COLUMNS} FROM publisher_pub_item_status \
             WHERE content_id = $1 AND ($2::BIGINT IS NULL OR pub_server_id = $2) \
             ORDER BY reference_id DESC"
        ))
        .bind(content_id)
        .bind(pub_server_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(item_status_from_row)
        .collect()
    }

    async fn cancel_unfinished_items(&self, job_id: i64) -> PublisherResult<u64> {
        let result = sqlx::query(
            "UPDATE publisher_pub_item_status SET status = 'CANCELLED', updated_at = $2 \
             WHERE job_id = $1 AND status NOT IN ('SUCCESS', 'FAILURE', 'CANCELLED')",
        )
        .bind(job_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn count_items(&self, job_id: i64) -> PublisherResult<ItemCounts> {
        let row = sqlx::query(
            "SELECT \
             COUNT(*) FILTER (WHERE status = 'SUCCESS' AND operation = 'PUBLISH') AS delivered, \
             COUNT(*) FILTER (WHERE status = 'SUCCESS' AND operation = 'UNPUBLISH') AS removed, \
             COUNT(*) FILTER (WHERE status = 'FAILURE') AS failed \
             FROM publisher_pub_item_status WHERE job_id = $1",
        )
        .bind(job_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(ItemCounts {
            delivered: row.try_get("delivered")?,
            removed: row.try_get("removed")?,
            failed: row.try_get("failed")?,
        })
    }

    async fn purge_job(&self, job_id: i64) -> PublisherResult<PurgeSummary> {
        let mut tx = self.pool.begin().await?;

        let items = sqlx::query("DELETE FROM publisher_pub_item_status WHERE job_id = $1")
            .bind(job_id)
            .execute(&mut *tx)
            .await?;
        let logs = sqlx::query("DELETE FROM publisher_edition_task_log WHERE job_id = $1")
            .bind(job_id)
            .execute(&mut *tx)
            .await?;
        let detached =
            sqlx::query("UPDATE publisher_site_items SET job_id = NULL WHERE job_id = $1")
                .bind(job_id)
                .execute(&mut *tx)
                .await?;
        sqlx::query("DELETE FROM publisher_pub_status WHERE status_id = $1")
            .bind(job_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(PurgeSummary {
            item_rows_removed: items.rows_affected(),
            task_logs_removed: logs.rows_affected(),
            ledger_rows_detached: detached.rows_affected(),
        })
    }

    fn supports_read_uncommitted(&self) -> bool {
        false
    }

    async fn find_site_items(
        &self,
        query: &SiteItemQuery,
        _mode: ReadMode,
    ) -> PublisherResult<Vec<SiteItem>> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT {SITE_ITEM_COLUMNS} FROM publisher_site_items WHERE TRUE"
        ));
        if let Some(site_id) = query.site_id {
            builder.push(" AND site_id = ").push_bind(site_id);
        }
        if query.exact_server {
            builder
                .push(" AND pub_server_id IS NOT DISTINCT FROM ")
                .push_bind(query.pub_server_id);
        } else if let Some(server_id) = query.pub_server_id {
            builder.push(" AND pub_server_id = ").push_bind(server_id);
        }
        if let Some(context_id) = query.delivery_context_id {
            builder.push(" AND delivery_context_id = ").push_bind(context_id);
        }
        if let Some(content_id) = query.content_id {
            builder.push(" AND content_id = ").push_bind(content_id);
        }
        if let Some(template_id) = query.template_id {
            builder.push(" AND template_id = ").push_bind(template_id);
        }
        if let Some(location) = &query.location {
            builder.push(" AND location = ").push_bind(location.clone());
        }
        if let Some(folder_ids) = &query.folder_ids {
            builder.push(" AND folder_id = ANY(").push_bind(folder_ids.clone()).push(")");
        }
        builder.push(" ORDER BY reference_id");

        builder
            .build()
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(site_item_from_row)
            .collect()
    }

    async fn mark_folders_moved(&self, folder_ids: &[i64]) -> PublisherResult<u64> {
        let result =
            sqlx::query("UPDATE publisher_site_items SET folder_id = $1 WHERE folder_id = ANY($2)")
                .bind(FOLDER_MOVED_SENTINEL)
                .bind(folder_ids)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    async fn insert_task_log(&self, log: NewEditionTaskLog) -> PublisherResult<EditionTaskLog> {
        let row = sqlx::query(
            "INSERT INTO publisher_edition_task_log (reference_id, job_id, edition_id, task_id, \
             elapsed_ms, success, message, logged_at) \
             VALUES (nextval('publisher_reference_seq'), $1, $2, $3, $4, $5, $6, $7) \
             RETURNING reference_id, job_id, edition_id, task_id, elapsed_ms, success, message, logged_at",
        )
        .bind(log.job_id)
        .bind(log.edition_id)
        .bind(log.task_id)
        .bind(log.elapsed_ms)
        .bind(log.success)
        .bind(&log.message)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        task_log_from_row(&row)
    }

    async fn load_task_logs(&self, job_id: i64) -> PublisherResult<Vec<EditionTaskLog>> {
        sqlx::query(
            "SELECT reference_id, job_id, edition_id, task_id, elapsed_ms, success, message, logged_at \
             FROM publisher_edition_task_log WHERE job_id = $1 ORDER BY reference_id",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(task_log_from_row)
        .collect()
    }
}

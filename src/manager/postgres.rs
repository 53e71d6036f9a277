//! PostgreSQL implementation of [`Storage`].
//!
//! Every write touching an item's records starts by locking the item row
//! (`SELECT ... FOR UPDATE`) inside a transaction, which serializes
//! check-and-set per item the same way the in-memory backend's per-item mutex
//! does. A partial unique index on `requests (item_id) WHERE status =
//! 'accepted'` backs the one-acceptance rule at the schema level.
//!
//! Single-row lookups read the primary; only listings use
//! [`PoolProvider::read`], which may point at a lagging replica.
//!
//! Queries are built at runtime with `sqlx::query` so the crate compiles
//! without a live database.

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::postgres::PgRow;
use uuid::Uuid;

use super::Storage;
use crate::config::SiblingPolicy;
use crate::domain::item::{Item, ItemFilter, ItemId, ItemStatus, UserId};
use crate::domain::message::{Message, MessageId, NewMessage};
use crate::domain::request::{
    Accepted, AnyRequest, Pending, Rejected, RejectionReason, Request, RequestData, RequestId,
    RequestStatus,
};
use crate::error::{HandoverError, Result};

mod pool_provider;

pub use pool_provider::{PoolProvider, ReplicatedPools, TestDbPools};

const ITEM_COLUMNS: &str =
    "id, owner_id, title, description, category, location, images, status, created_at, updated_at";

const REQUEST_COLUMNS: &str = "id, item_id, requester_id, message, status, created_at, \
     accepted_at, rejected_at, rejection_reason";

/// PostgreSQL storage backend.
///
/// # Example
/// ```ignore
/// use handover::manager::postgres::PostgresStorage;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgresql://localhost/handover").await?;
/// handover::migrator().run(&pool).await?;
/// let exchange = Exchange::new(Arc::new(PostgresStorage::new(pool)));
/// ```
pub struct PostgresStorage<P: PoolProvider = sqlx::PgPool> {
    pools: P,
}

impl<P: PoolProvider> PostgresStorage<P> {
    pub fn new(pools: P) -> Self {
        Self { pools }
    }

    pub fn pools(&self) -> &P {
        &self.pools
    }
}

/// Map a driver error, treating unique violations as lost races.
fn db_error(context: &'static str) -> impl FnOnce(sqlx::Error) -> HandoverError {
    move |e| match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            HandoverError::Conflict(format!("{}: {}", context, db.message()))
        }
        _ => HandoverError::Other(anyhow!("{}: {}", context, e)),
    }
}

fn item_from_row(row: &PgRow) -> Result<Item> {
    let status: String = row.try_get("status").map_err(db_error("Failed to read item"))?;
    let status = status
        .parse::<ItemStatus>()
        .map_err(|e| HandoverError::Other(anyhow!("Invalid item status '{}': {}", status, e)))?;

    let read = |e: sqlx::Error| HandoverError::Other(anyhow!("Failed to read item row: {}", e));
    Ok(Item {
        id: ItemId(row.try_get("id").map_err(read)?),
        owner_id: UserId(row.try_get("owner_id").map_err(read)?),
        title: row.try_get("title").map_err(read)?,
        description: row.try_get("description").map_err(read)?,
        category: row.try_get("category").map_err(read)?,
        location: row.try_get("location").map_err(read)?,
        images: row.try_get("images").map_err(read)?,
        status,
        created_at: row.try_get("created_at").map_err(read)?,
        updated_at: row.try_get("updated_at").map_err(read)?,
    })
}

fn request_from_row(row: &PgRow) -> Result<AnyRequest> {
    let read = |e: sqlx::Error| HandoverError::Other(anyhow!("Failed to read request row: {}", e));

    let data = RequestData {
        id: RequestId(row.try_get("id").map_err(read)?),
        item_id: ItemId(row.try_get("item_id").map_err(read)?),
        requester_id: UserId(row.try_get("requester_id").map_err(read)?),
        message: row.try_get("message").map_err(read)?,
        created_at: row.try_get("created_at").map_err(read)?,
    };

    let status: String = row.try_get("status").map_err(read)?;
    let status = status
        .parse::<RequestStatus>()
        .map_err(|e| HandoverError::Other(anyhow!("{}", e)))?;

    let id = data.id;
    let missing = move |column: &str| {
        HandoverError::Other(anyhow!(
            "Request {} is '{}' but has no {}",
            id,
            status,
            column
        ))
    };

    let request = match status {
        RequestStatus::Pending => AnyRequest::Pending(Request {
            data,
            state: Pending {},
        }),
        RequestStatus::Accepted => {
            let accepted_at: Option<DateTime<Utc>> = row.try_get("accepted_at").map_err(read)?;
            let accepted_at = accepted_at.ok_or_else(|| missing("accepted_at"))?;
            AnyRequest::Accepted(Request {
                data,
                state: Accepted { accepted_at },
            })
        }
        RequestStatus::Rejected => {
            let rejected_at: Option<DateTime<Utc>> = row.try_get("rejected_at").map_err(read)?;
            let reason: Option<String> = row.try_get("rejection_reason").map_err(read)?;
            let rejected_at = rejected_at.ok_or_else(|| missing("rejected_at"))?;
            let reason = reason
                .ok_or_else(|| missing("rejection_reason"))?
                .parse::<RejectionReason>()
                .map_err(|e| HandoverError::Other(anyhow!("{}", e)))?;
            AnyRequest::Rejected(Request {
                data,
                state: Rejected {
                    rejected_at,
                    reason,
                },
            })
        }
    };
    Ok(request)
}

fn message_from_row(row: &PgRow) -> Result<Message> {
    let read = |e: sqlx::Error| HandoverError::Other(anyhow!("Failed to read message row: {}", e));
    Ok(Message {
        id: MessageId(row.try_get("id").map_err(read)?),
        request_id: RequestId(row.try_get("request_id").map_err(read)?),
        sender_id: UserId(row.try_get("sender_id").map_err(read)?),
        body: row.try_get("body").map_err(read)?,
        created_at: row.try_get("created_at").map_err(read)?,
    })
}

/// `%needle%` for ILIKE with the pattern metacharacters escaped.
fn like_pattern(needle: &str) -> String {
    let escaped = needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

/// Lock an item row for the rest of the transaction and return its status.
async fn lock_item(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    item_id: ItemId,
) -> Result<ItemStatus> {
    let row = sqlx::query("SELECT status FROM items WHERE id = $1 FOR UPDATE")
        .bind(*item_id as Uuid)
        .fetch_optional(&mut **tx)
        .await
        .map_err(db_error("Failed to lock item"))?
        .ok_or(HandoverError::ItemNotFound(item_id))?;

    let status: String = row.try_get("status").map_err(db_error("Failed to lock item"))?;
    status
        .parse::<ItemStatus>()
        .map_err(|e| HandoverError::Other(anyhow!("Invalid item status '{}': {}", status, e)))
}

async fn has_accepted(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    item_id: ItemId,
) -> Result<bool> {
    let (exists,): (bool,) = sqlx::query_as(
        "SELECT EXISTS (SELECT 1 FROM requests WHERE item_id = $1 AND status = 'accepted')",
    )
    .bind(*item_id as Uuid)
    .fetch_one(&mut **tx)
    .await
    .map_err(db_error("Failed to check accepted requests"))?;
    Ok(exists)
}

#[async_trait]
impl<P: PoolProvider> Storage for PostgresStorage<P> {
    #[tracing::instrument(skip_all, fields(item_id = %item.id))]
    async fn insert_item(&self, item: &Item) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO items (id, owner_id, title, description, category, location, images, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(*item.id as Uuid)
        .bind(*item.owner_id as Uuid)
        .bind(&item.title)
        .bind(&item.description)
        .bind(&item.category)
        .bind(&item.location)
        .bind(&item.images)
        .bind(item.status.as_str())
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(self.pools.write())
        .await
        .map_err(db_error("Failed to insert item"))?;
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(item_id = %item_id))]
    async fn get_item(&self, item_id: ItemId) -> Result<Item> {
        let sql = format!("SELECT {} FROM items WHERE id = $1", ITEM_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(*item_id as Uuid)
            .fetch_optional(self.pools.write())
            .await
            .map_err(db_error("Failed to fetch item"))?
            .ok_or(HandoverError::ItemNotFound(item_id))?;
        item_from_row(&row)
    }

    #[tracing::instrument(skip(self))]
    async fn list_items(&self, filter: &ItemFilter) -> Result<Vec<Item>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM items
            WHERE ($1::uuid IS NULL OR owner_id = $1)
              AND ($2::text IS NULL OR status = $2)
              AND ($3::text IS NULL OR category = $3)
              AND ($4::text IS NULL OR title ILIKE $4 OR description ILIKE $4)
            ORDER BY created_at DESC, seq DESC
            LIMIT $5
            "#,
            ITEM_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(filter.owner.map(|owner| owner.0))
            .bind(filter.status.map(|status| status.as_str()))
            .bind(filter.category_filter())
            .bind(filter.search_needle().map(|needle| like_pattern(&needle)))
            .bind(filter.limit.map(|limit| limit.min(i64::MAX as usize) as i64))
            .fetch_all(self.pools.read())
            .await
            .map_err(db_error("Failed to list items"))?;

        rows.iter().map(item_from_row).collect()
    }

    #[tracing::instrument(skip_all, fields(item_id = %item_id, expected = %expected, next = %next))]
    async fn compare_and_set_item_status(
        &self,
        item_id: ItemId,
        expected: ItemStatus,
        next: ItemStatus,
    ) -> Result<Item> {
        let mut tx = self
            .pools
            .write()
            .begin()
            .await
            .map_err(db_error("Failed to begin transaction"))?;

        let current = lock_item(&mut tx, item_id).await?;
        if current != expected {
            return Err(HandoverError::Conflict(format!(
                "item {} is '{}', expected '{}'",
                item_id, current, expected
            )));
        }
        if next == ItemStatus::Available && has_accepted(&mut tx, item_id).await? {
            return Err(HandoverError::InvalidState(format!(
                "item {} has an accepted request and cannot become available again",
                item_id
            )));
        }

        let sql = format!(
            "UPDATE items SET status = $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
            ITEM_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(*item_id as Uuid)
            .bind(next.as_str())
            .fetch_one(&mut *tx)
            .await
            .map_err(db_error("Failed to update item status"))?;
        let item = item_from_row(&row)?;

        tx.commit()
            .await
            .map_err(db_error("Failed to commit transaction"))?;
        Ok(item)
    }

    #[tracing::instrument(skip_all, fields(request_id = %request.data.id, item_id = %request.data.item_id))]
    async fn insert_request(&self, request: &Request<Pending>) -> Result<()> {
        let item_id = request.data.item_id;
        let mut tx = self
            .pools
            .write()
            .begin()
            .await
            .map_err(db_error("Failed to begin transaction"))?;

        let status = lock_item(&mut tx, item_id).await?;
        if status != ItemStatus::Available {
            return Err(HandoverError::InvalidState(format!(
                "item {} is '{}', requests need it 'available'",
                item_id, status
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO requests (id, item_id, requester_id, message, status, created_at)
            VALUES ($1, $2, $3, $4, 'pending', $5)
            "#,
        )
        .bind(*request.data.id as Uuid)
        .bind(*item_id as Uuid)
        .bind(*request.data.requester_id as Uuid)
        .bind(&request.data.message)
        .bind(request.data.created_at)
        .execute(&mut *tx)
        .await
        .map_err(db_error("Failed to insert request"))?;

        tx.commit()
            .await
            .map_err(db_error("Failed to commit transaction"))?;
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(request_id = %request_id))]
    async fn get_request(&self, request_id: RequestId) -> Result<AnyRequest> {
        let sql = format!("SELECT {} FROM requests WHERE id = $1", REQUEST_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(*request_id as Uuid)
            .fetch_optional(self.pools.write())
            .await
            .map_err(db_error("Failed to fetch request"))?
            .ok_or(HandoverError::RequestNotFound(request_id))?;
        request_from_row(&row)
    }

    #[tracing::instrument(skip_all, fields(item_id = %item_id))]
    async fn list_requests_for_item(&self, item_id: ItemId) -> Result<Vec<AnyRequest>> {
        let (exists,): (bool,) = sqlx::query_as("SELECT EXISTS (SELECT 1 FROM items WHERE id = $1)")
            .bind(*item_id as Uuid)
            .fetch_one(self.pools.write())
            .await
            .map_err(db_error("Failed to check item"))?;
        if !exists {
            return Err(HandoverError::ItemNotFound(item_id));
        }

        let sql = format!(
            "SELECT {} FROM requests WHERE item_id = $1 ORDER BY created_at ASC, seq ASC",
            REQUEST_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(*item_id as Uuid)
            .fetch_all(self.pools.read())
            .await
            .map_err(db_error("Failed to list requests"))?;
        rows.iter().map(request_from_row).collect()
    }

    #[tracing::instrument(skip_all, fields(requester_id = %requester_id))]
    async fn list_requests_by_requester(&self, requester_id: UserId) -> Result<Vec<AnyRequest>> {
        let sql = format!(
            "SELECT {} FROM requests WHERE requester_id = $1 ORDER BY created_at DESC, seq DESC",
            REQUEST_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(*requester_id as Uuid)
            .fetch_all(self.pools.read())
            .await
            .map_err(db_error("Failed to list requests"))?;
        rows.iter().map(request_from_row).collect()
    }

    #[tracing::instrument(skip_all, fields(request_id = %request.data.id, item_id = %request.data.item_id))]
    async fn commit_acceptance(
        &self,
        request: &Request<Accepted>,
        policy: SiblingPolicy,
    ) -> Result<(Item, Vec<Request<Rejected>>)> {
        let request_id = request.data.id;
        let item_id = request.data.item_id;
        let decided_at = request.state.accepted_at;

        let mut tx = self
            .pools
            .write()
            .begin()
            .await
            .map_err(db_error("Failed to begin transaction"))?;

        let item_status = lock_item(&mut tx, item_id).await?;

        let row = sqlx::query("SELECT status FROM requests WHERE id = $1 AND item_id = $2 FOR UPDATE")
            .bind(*request_id as Uuid)
            .bind(*item_id as Uuid)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_error("Failed to fetch request"))?
            .ok_or(HandoverError::RequestNotFound(request_id))?;
        let request_status: String = row
            .try_get("status")
            .map_err(db_error("Failed to fetch request"))?;

        // All guards first: nothing is written unless every one passes.
        if request_status != RequestStatus::Pending.as_str() {
            return Err(HandoverError::Conflict(format!(
                "request {} is no longer pending",
                request_id
            )));
        }
        if item_status != ItemStatus::Available {
            return Err(HandoverError::Conflict(format!(
                "item {} is no longer available",
                item_id
            )));
        }
        if has_accepted(&mut tx, item_id).await? {
            return Err(HandoverError::Conflict(format!(
                "item {} already has an accepted request",
                item_id
            )));
        }

        sqlx::query("UPDATE requests SET status = 'accepted', accepted_at = $2 WHERE id = $1")
            .bind(*request_id as Uuid)
            .bind(decided_at)
            .execute(&mut *tx)
            .await
            .map_err(db_error("Failed to accept request"))?;

        let sql = format!(
            "UPDATE items SET status = 'reserved', updated_at = $2 WHERE id = $1 RETURNING {}",
            ITEM_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(*item_id as Uuid)
            .bind(decided_at)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_error("Failed to reserve item"))?;
        let item = item_from_row(&row)?;

        let mut auto_rejected = Vec::new();
        if policy == SiblingPolicy::AutoReject {
            let sql = format!(
                r#"
                UPDATE requests
                SET status = 'rejected', rejected_at = $2, rejection_reason = $3
                WHERE item_id = $1 AND status = 'pending'
                RETURNING {}
                "#,
                REQUEST_COLUMNS
            );
            let rows = sqlx::query(&sql)
                .bind(*item_id as Uuid)
                .bind(decided_at)
                .bind(RejectionReason::SiblingAccepted.as_str())
                .fetch_all(&mut *tx)
                .await
                .map_err(db_error("Failed to reject sibling requests"))?;

            for row in &rows {
                if let AnyRequest::Rejected(rejected) = request_from_row(row)? {
                    auto_rejected.push(rejected);
                }
            }
            // RETURNING has no defined order
            auto_rejected.sort_by_key(|r| r.data.created_at);
        }

        tx.commit()
            .await
            .map_err(db_error("Failed to commit transaction"))?;
        Ok((item, auto_rejected))
    }

    #[tracing::instrument(skip_all, fields(request_id = %request.data.id))]
    async fn commit_rejection(&self, request: &Request<Rejected>) -> Result<()> {
        let request_id = request.data.id;
        let rows_affected = sqlx::query(
            r#"
            UPDATE requests
            SET status = 'rejected', rejected_at = $2, rejection_reason = $3
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(*request_id as Uuid)
        .bind(request.state.rejected_at)
        .bind(request.state.reason.as_str())
        .execute(self.pools.write())
        .await
        .map_err(db_error("Failed to reject request"))?
        .rows_affected();

        if rows_affected == 0 {
            // Either gone or already decided
            let (exists,): (bool,) =
                sqlx::query_as("SELECT EXISTS (SELECT 1 FROM requests WHERE id = $1)")
                    .bind(*request_id as Uuid)
                    .fetch_one(self.pools.write())
                    .await
                    .map_err(db_error("Failed to check request"))?;
            return Err(if exists {
                HandoverError::Conflict(format!("request {} is no longer pending", request_id))
            } else {
                HandoverError::RequestNotFound(request_id)
            });
        }
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(request_id = %message.request_id))]
    async fn append_message(&self, message: NewMessage) -> Result<Message> {
        let mut tx = self
            .pools
            .write()
            .begin()
            .await
            .map_err(db_error("Failed to begin transaction"))?;

        // Serializes appends per request so timestamps never go backwards
        sqlx::query("SELECT id FROM requests WHERE id = $1 FOR UPDATE")
            .bind(*message.request_id as Uuid)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_error("Failed to lock request"))?
            .ok_or(HandoverError::RequestNotFound(message.request_id))?;

        let row = sqlx::query(
            r#"
            INSERT INTO messages (request_id, sender_id, body, created_at)
            SELECT $1, $2, $3, GREATEST(
                clock_timestamp(),
                COALESCE((SELECT MAX(created_at) FROM messages WHERE request_id = $1), '-infinity')
            )
            RETURNING id, request_id, sender_id, body, created_at
            "#,
        )
        .bind(*message.request_id as Uuid)
        .bind(*message.sender_id as Uuid)
        .bind(&message.body)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error("Failed to insert message"))?;
        let stored = message_from_row(&row)?;

        tx.commit()
            .await
            .map_err(db_error("Failed to commit transaction"))?;
        Ok(stored)
    }

    #[tracing::instrument(skip_all, fields(request_id = %request_id))]
    async fn list_messages(&self, request_id: RequestId) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            r#"
            SELECT id, request_id, sender_id, body, created_at
            FROM messages
            WHERE request_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(*request_id as Uuid)
        .fetch_all(self.pools.read())
        .await
        .map_err(db_error("Failed to list messages"))?;
        rows.iter().map(message_from_row).collect()
    }
}

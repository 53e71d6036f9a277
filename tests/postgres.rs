#![cfg(feature = "postgres")]

use std::sync::Arc;

use handover::{
    Exchange, HandoverError, ItemStatus, NewItem, PoolProvider, PostgresStorage, RequestStatus,
    TestDbPools, UserId,
};
use uuid::Uuid;

fn user() -> UserId {
    UserId(Uuid::new_v4())
}

async fn exchange(pool: sqlx::PgPool) -> Exchange<PostgresStorage<TestDbPools>> {
    let pools = TestDbPools::new(pool).await.unwrap();
    Exchange::new(Arc::new(PostgresStorage::new(pools)))
}

#[sqlx::test]
#[test_log::test]
async fn test_full_exchange_on_postgres(pool: sqlx::PgPool) {
    let exchange = exchange(pool).await;
    let (owner, requester, latecomer) = (user(), user(), user());

    let item = exchange
        .create_item(
            owner,
            NewItem {
                title: "Camping stove".to_string(),
                category: "outdoor".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let request = exchange
        .create_request(item.id, requester, "hi")
        .await
        .unwrap();

    let acceptance = exchange
        .accept_request(request.data.id, owner)
        .await
        .unwrap();
    assert_eq!(acceptance.item.status, ItemStatus::Reserved);

    let err = exchange
        .create_request(item.id, latecomer, "me too")
        .await
        .unwrap_err();
    assert!(matches!(err, HandoverError::InvalidState(_)));

    let err = exchange
        .accept_request(request.data.id, owner)
        .await
        .unwrap_err();
    assert!(matches!(err, HandoverError::InvalidState(_)));

    for text in ["when?", "tonight", "ok"] {
        exchange
            .post_message(request.data.id, requester, text)
            .await
            .unwrap();
    }
    let bodies: Vec<String> = exchange
        .list_messages(request.data.id, owner)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.body)
        .collect();
    assert_eq!(bodies, vec!["when?", "tonight", "ok"]);

    let given = exchange.complete_exchange(item.id, owner).await.unwrap();
    assert_eq!(given.status, ItemStatus::Given);
    let stored = exchange
        .get_request(request.data.id, requester)
        .await
        .unwrap();
    assert_eq!(stored.status(), RequestStatus::Accepted);
}

#[sqlx::test]
#[test_log::test]
async fn test_rejection_on_postgres_leaves_item_available(pool: sqlx::PgPool) {
    let exchange = exchange(pool).await;
    let owner = user();
    let requester = user();

    let item = exchange
        .create_item(
            owner,
            NewItem {
                title: "Fan".to_string(),
                category: "appliances".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let request = exchange
        .create_request(item.id, requester, "")
        .await
        .unwrap();

    let err = exchange
        .reject_request(request.data.id, requester)
        .await
        .unwrap_err();
    assert!(matches!(err, HandoverError::Forbidden { .. }));

    exchange
        .reject_request(request.data.id, owner)
        .await
        .unwrap();
    assert_eq!(
        exchange.get_item(item.id).await.unwrap().status,
        ItemStatus::Available
    );
    exchange
        .post_message(request.data.id, requester, "ok")
        .await
        .unwrap();
}

/// Reads listings from an empty copy of the schema, like a replica that has
/// not caught up with anything yet.
#[derive(Clone)]
struct LaggingReplica {
    primary: sqlx::PgPool,
    replica: sqlx::PgPool,
}

impl LaggingReplica {
    async fn new(pool: sqlx::PgPool) -> Self {
        sqlx::query("CREATE SCHEMA lagging")
            .execute(&pool)
            .await
            .unwrap();
        for table in ["items", "requests", "messages"] {
            sqlx::query(&format!(
                "CREATE TABLE lagging.{0} (LIKE public.{0} INCLUDING ALL)",
                table
            ))
            .execute(&pool)
            .await
            .unwrap();
        }
        let options = pool
            .connect_options()
            .as_ref()
            .clone()
            .options([("search_path", "lagging")]);
        let replica = sqlx::postgres::PgPoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await
            .unwrap();
        Self {
            primary: pool,
            replica,
        }
    }
}

impl PoolProvider for LaggingReplica {
    fn read(&self) -> &sqlx::PgPool {
        &self.replica
    }

    fn write(&self) -> &sqlx::PgPool {
        &self.primary
    }
}

#[sqlx::test]
#[test_log::test]
async fn test_fresh_request_usable_while_replica_lags(pool: sqlx::PgPool) {
    let pools = LaggingReplica::new(pool).await;
    let exchange = Exchange::new(Arc::new(PostgresStorage::new(pools)));
    let (owner, requester) = (user(), user());

    let item = exchange
        .create_item(
            owner,
            NewItem {
                title: "Kettle".to_string(),
                category: "kitchen".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let request = exchange
        .create_request(item.id, requester, "still free?")
        .await
        .unwrap();

    // Lookups behind the guards see the primary
    let stored = exchange
        .get_request(request.data.id, owner)
        .await
        .unwrap();
    assert_eq!(stored.status(), RequestStatus::Pending);
    exchange
        .post_message(request.data.id, requester, "I can come today")
        .await
        .unwrap();
    let acceptance = exchange
        .accept_request(request.data.id, owner)
        .await
        .unwrap();
    assert_eq!(acceptance.item.status, ItemStatus::Reserved);
    assert!(exchange.get_requests_for_item(item.id).await.is_ok());

    // Listings are allowed to trail behind
    assert!(exchange.list_items(&Default::default()).await.unwrap().is_empty());
    assert!(
        exchange
            .list_messages(request.data.id, owner)
            .await
            .unwrap()
            .is_empty()
    );
}

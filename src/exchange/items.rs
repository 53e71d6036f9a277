//! Item store operations.

use chrono::Utc;
use metrics::counter;
use uuid::Uuid;

use super::{Exchange, bounded_text, note_conflict, required_text};
use crate::access::ensure_item_owner;
use crate::domain::item::{ALL_CATEGORIES, Item, ItemFilter, ItemId, ItemStatus, NewItem, UserId};
use crate::error::{HandoverError, Result};
use crate::manager::Storage;

impl<S: Storage> Exchange<S> {
    /// List a new item. It starts out `available`.
    ///
    /// # Errors
    /// - `Validation` if title or category is missing, a field is too long,
    ///   or the category is the `"all"` sentinel
    #[tracing::instrument(skip_all, fields(owner = %owner))]
    pub async fn create_item(&self, owner: UserId, input: NewItem) -> Result<Item> {
        let item = self.validate_new_item(owner, input)?;
        self.storage.insert_item(&item).await?;

        counter!("handover_items_total", "status" => "available").increment(1);
        tracing::info!(item_id = %item.id, category = %item.category, "Item listed");
        Ok(item)
    }

    fn validate_new_item(&self, owner: UserId, input: NewItem) -> Result<Item> {
        let config = &self.config;
        let title = required_text("title", &input.title, config.max_title_len)?;
        let category = required_text("category", &input.category, config.max_title_len)?;
        if category.eq_ignore_ascii_case(ALL_CATEGORIES) {
            return Err(HandoverError::Validation(format!(
                "'{}' is reserved and cannot be used as a category",
                ALL_CATEGORIES
            )));
        }
        let description = bounded_text("description", &input.description, config.max_text_len)?;
        let location = bounded_text("location", &input.location, config.max_title_len)?;

        if input.images.len() > config.max_images {
            return Err(HandoverError::Validation(format!(
                "at most {} images are allowed",
                config.max_images
            )));
        }
        let images = input
            .images
            .iter()
            .map(|image| required_text("image", image, config.max_text_len))
            .collect::<Result<Vec<_>>>()?;

        let now = Utc::now();
        Ok(Item {
            id: ItemId(Uuid::new_v4()),
            owner_id: owner,
            title,
            description,
            category,
            location,
            images,
            status: ItemStatus::Available,
            created_at: now,
            updated_at: now,
        })
    }

    #[tracing::instrument(skip_all, fields(item_id = %item_id))]
    pub async fn get_item(&self, item_id: ItemId) -> Result<Item> {
        self.storage.get_item(item_id).await
    }

    /// Snapshot of the items matching `filter`, newest first.
    ///
    /// Each call re-runs the query; there is no live subscription.
    #[tracing::instrument(skip(self))]
    pub async fn list_items(&self, filter: &ItemFilter) -> Result<Vec<Item>> {
        let items = self.storage.list_items(filter).await?;
        tracing::debug!(count = items.len(), "Listed items");
        Ok(items)
    }

    /// Everything a user has listed, newest first.
    pub async fn list_items_by_owner(&self, owner: UserId) -> Result<Vec<Item>> {
        self.list_items(&ItemFilter::by_owner(owner)).await
    }

    /// Change an item's status on behalf of its owner.
    ///
    /// # Errors
    /// - `ItemNotFound` if the item does not exist
    /// - `Forbidden` unless `acting_user` owns the item
    /// - `InvalidTransition` unless the move is `available -> reserved`,
    ///   `reserved -> given`, `available -> given` or `reserved -> available`
    /// - `InvalidState` for `reserved -> available` while a request on the
    ///   item is accepted
    /// - `Conflict` if the status changed concurrently
    #[tracing::instrument(skip_all, fields(item_id = %item_id, acting_user = %acting_user, next = %next))]
    pub async fn set_item_status(
        &self,
        item_id: ItemId,
        next: ItemStatus,
        acting_user: UserId,
    ) -> Result<Item> {
        let item = self.storage.get_item(item_id).await?;
        ensure_item_owner(acting_user, &item, "change item status")?;

        if !item.status.can_transition_to(next) {
            return Err(HandoverError::item_transition(item.status, next));
        }

        let updated = self
            .storage
            .compare_and_set_item_status(item_id, item.status, next)
            .await
            .inspect_err(note_conflict("set_item_status"))?;

        counter!("handover_items_total", "status" => next.as_str()).increment(1);
        tracing::info!(from = %item.status, to = %next, "Item status changed");
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExchangeConfig;

    fn owner() -> UserId {
        UserId(Uuid::new_v4())
    }

    fn lamp() -> NewItem {
        NewItem {
            title: "Desk lamp".to_string(),
            description: "Works fine".to_string(),
            category: "furniture".to_string(),
            location: "Old Town".to_string(),
            images: vec!["https://img.example/lamp.jpg".to_string()],
        }
    }

    #[tokio::test]
    async fn test_create_item_starts_available() {
        let exchange = Exchange::in_memory();
        let owner = owner();
        let item = exchange.create_item(owner, lamp()).await.unwrap();

        assert_eq!(item.status, ItemStatus::Available);
        assert_eq!(item.owner_id, owner);
        assert_eq!(exchange.get_item(item.id).await.unwrap(), item);
    }

    #[tokio::test]
    async fn test_create_item_requires_title_and_category() {
        let exchange = Exchange::in_memory();

        let missing_title = NewItem {
            title: "  ".to_string(),
            ..lamp()
        };
        let err = exchange.create_item(owner(), missing_title).await.unwrap_err();
        assert!(matches!(err, HandoverError::Validation(_)));

        let missing_category = NewItem {
            category: String::new(),
            ..lamp()
        };
        let err = exchange
            .create_item(owner(), missing_category)
            .await
            .unwrap_err();
        assert!(matches!(err, HandoverError::Validation(_)));

        let sentinel = NewItem {
            category: "All".to_string(),
            ..lamp()
        };
        let err = exchange.create_item(owner(), sentinel).await.unwrap_err();
        assert!(matches!(err, HandoverError::Validation(_)));

        assert!(
            exchange
                .list_items(&ItemFilter::default())
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_create_item_limits() {
        let config = ExchangeConfig {
            max_title_len: 5,
            max_images: 1,
            ..Default::default()
        };
        let exchange = Exchange::in_memory().with_config(config);

        let long_title = NewItem {
            title: "Bookshelf".to_string(),
            category: "misc".to_string(),
            ..Default::default()
        };
        assert!(exchange.create_item(owner(), long_title).await.is_err());

        let many_images = NewItem {
            title: "Lamp".to_string(),
            category: "misc".to_string(),
            images: vec!["a".to_string(), "b".to_string()],
            ..Default::default()
        };
        assert!(exchange.create_item(owner(), many_images).await.is_err());
    }

    #[tokio::test]
    async fn test_get_missing_item() {
        let exchange = Exchange::in_memory();
        let err = exchange.get_item(ItemId(Uuid::new_v4())).await.unwrap_err();
        assert!(matches!(err, HandoverError::ItemNotFound(_)));
    }

    #[tokio::test]
    async fn test_set_status_owner_only() {
        let exchange = Exchange::in_memory();
        let owner = owner();
        let item = exchange.create_item(owner, lamp()).await.unwrap();

        let err = exchange
            .set_item_status(item.id, ItemStatus::Given, UserId(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, HandoverError::Forbidden { .. }));
        assert_eq!(
            exchange.get_item(item.id).await.unwrap().status,
            ItemStatus::Available
        );
    }

    #[tokio::test]
    async fn test_set_status_follows_transition_table() {
        let exchange = Exchange::in_memory();
        let owner = owner();
        let item = exchange.create_item(owner, lamp()).await.unwrap();

        let reserved = exchange
            .set_item_status(item.id, ItemStatus::Reserved, owner)
            .await
            .unwrap();
        assert_eq!(reserved.status, ItemStatus::Reserved);

        // Manual reservation without an accepted request can be released
        let released = exchange
            .set_item_status(item.id, ItemStatus::Available, owner)
            .await
            .unwrap();
        assert_eq!(released.status, ItemStatus::Available);

        let given = exchange
            .set_item_status(item.id, ItemStatus::Given, owner)
            .await
            .unwrap();
        assert_eq!(given.status, ItemStatus::Given);

        let err = exchange
            .set_item_status(item.id, ItemStatus::Available, owner)
            .await
            .unwrap_err();
        assert!(matches!(err, HandoverError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_list_items_by_owner() {
        let exchange = Exchange::in_memory();
        let alice = owner();
        let bob = owner();
        exchange.create_item(alice, lamp()).await.unwrap();
        exchange.create_item(alice, lamp()).await.unwrap();
        exchange.create_item(bob, lamp()).await.unwrap();

        let mine = exchange.list_items_by_owner(alice).await.unwrap();
        assert_eq!(mine.len(), 2);
        assert!(mine.iter().all(|i| i.owner_id == alice));
    }
}

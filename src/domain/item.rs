//! Item types: a listed giveaway object and its availability lifecycle.
//!
//! ```text
//! available ──reserve──> reserved ──give──> given
//!     │                     │
//!     └───────give──────────┼──────────────>
//!                           └──release──> available   (only without an accepted request)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Unique identifier for an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub Uuid);

impl From<Uuid> for ItemId {
    fn from(uuid: Uuid) -> Self {
        ItemId(uuid)
    }
}

impl std::ops::Deref for ItemId {
    type Target = Uuid;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Display only first 8 characters for readability in logs
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Identity of an authenticated user, supplied by the external auth collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl From<Uuid> for UserId {
    fn from(uuid: Uuid) -> Self {
        UserId(uuid)
    }
}

impl std::str::FromStr for UserId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(UserId)
    }
}

impl std::ops::Deref for UserId {
    type Target = Uuid;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Availability of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Available,
    Reserved,
    Given,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Available => "available",
            ItemStatus::Reserved => "reserved",
            ItemStatus::Given => "given",
        }
    }

    /// Whether `self -> next` is one of the allowed item transitions.
    ///
    /// `reserved -> available` is allowed here; the storage layer additionally
    /// refuses it while the item holds an accepted request.
    pub fn can_transition_to(self, next: ItemStatus) -> bool {
        matches!(
            (self, next),
            (ItemStatus::Available, ItemStatus::Reserved)
                | (ItemStatus::Reserved, ItemStatus::Given)
                | (ItemStatus::Available, ItemStatus::Given)
                | (ItemStatus::Reserved, ItemStatus::Available)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStatus::Given)
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ItemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(ItemStatus::Available),
            "reserved" => Ok(ItemStatus::Reserved),
            "given" => Ok(ItemStatus::Given),
            _ => Err(format!("Invalid item status: {}", s)),
        }
    }
}

/// A listed giveaway object.
///
/// Title, description, category, location and images are opaque to the
/// engine apart from search and category filtering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Item {
    pub id: ItemId,
    pub owner_id: UserId,
    pub title: String,
    pub description: String,
    pub category: String,
    pub location: String,
    pub images: Vec<String>,
    pub status: ItemStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Item {
    pub fn is_owned_by(&self, user: UserId) -> bool {
        self.owner_id == user
    }
}

/// Sentinel category value meaning "no category filter".
pub const ALL_CATEGORIES: &str = "all";

/// Input for listing a new item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewItem {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub category: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub images: Vec<String>,
}

/// Filter for listing items. Results are always newest-first.
///
/// Deserializes from query-string values: a blank `owner`, `status` or
/// `limit` (`?owner=`) means "no filter".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemFilter {
    /// Case-insensitive substring match on title or description
    #[serde(default)]
    pub search: Option<String>,
    /// Exact category match; `"all"` disables the filter
    #[serde(default)]
    pub category: Option<String>,
    /// Only items listed by this user
    #[serde(default, deserialize_with = "blank_as_none")]
    pub owner: Option<UserId>,
    /// Only items in this status
    #[serde(default, deserialize_with = "blank_as_none")]
    pub status: Option<ItemStatus>,
    /// Maximum number of items to return
    #[serde(default, deserialize_with = "blank_as_none")]
    pub limit: Option<usize>,
}

fn blank_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

impl ItemFilter {
    pub fn by_owner(owner: UserId) -> Self {
        Self {
            owner: Some(owner),
            ..Default::default()
        }
    }

    /// Normalized search needle, `None` when blank.
    pub fn search_needle(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase)
    }

    /// Category to match exactly, `None` when blank or the "all" sentinel.
    pub fn category_filter(&self) -> Option<&str> {
        self.category
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty() && *c != ALL_CATEGORIES)
    }

    /// Whether `item` passes every field of this filter except `limit`.
    pub fn matches(&self, item: &Item) -> bool {
        if let Some(owner) = self.owner
            && item.owner_id != owner
        {
            return false;
        }
        if let Some(status) = self.status
            && item.status != status
        {
            return false;
        }
        if let Some(category) = self.category_filter()
            && item.category != category
        {
            return false;
        }
        match self.search_needle() {
            Some(needle) => {
                item.title.to_lowercase().contains(&needle)
                    || item.description.to_lowercase().contains(&needle)
            }
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(title: &str, description: &str, category: &str) -> Item {
        let now = Utc::now();
        Item {
            id: ItemId(Uuid::new_v4()),
            owner_id: UserId(Uuid::new_v4()),
            title: title.to_string(),
            description: description.to_string(),
            category: category.to_string(),
            location: String::new(),
            images: vec![],
            status: ItemStatus::Available,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_transition_table() {
        use ItemStatus::*;
        assert!(Available.can_transition_to(Reserved));
        assert!(Available.can_transition_to(Given));
        assert!(Reserved.can_transition_to(Given));
        assert!(Reserved.can_transition_to(Available));

        assert!(!Given.can_transition_to(Available));
        assert!(!Given.can_transition_to(Reserved));
        assert!(!Available.can_transition_to(Available));
        assert!(!Reserved.can_transition_to(Reserved));
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [ItemStatus::Available, ItemStatus::Reserved, ItemStatus::Given] {
            assert_eq!(status.as_str().parse::<ItemStatus>().unwrap(), status);
        }
        assert!("archived".parse::<ItemStatus>().is_err());
    }

    #[test]
    fn test_search_is_case_insensitive_on_title_and_description() {
        let lamp = item("Desk Lamp", "warm light", "furniture");
        let filter = ItemFilter {
            search: Some("LAMP".to_string()),
            ..Default::default()
        };
        assert!(filter.matches(&lamp));

        let filter = ItemFilter {
            search: Some("Warm".to_string()),
            ..Default::default()
        };
        assert!(filter.matches(&lamp));

        let filter = ItemFilter {
            search: Some("sofa".to_string()),
            ..Default::default()
        };
        assert!(!filter.matches(&lamp));
    }

    #[test]
    fn test_all_category_sentinel_disables_filter() {
        let lamp = item("Lamp", "", "furniture");
        let all = ItemFilter {
            category: Some("all".to_string()),
            ..Default::default()
        };
        assert!(all.matches(&lamp));

        let books = ItemFilter {
            category: Some("books".to_string()),
            ..Default::default()
        };
        assert!(!books.matches(&lamp));
    }

    #[test]
    fn test_blank_search_matches_everything() {
        let lamp = item("Lamp", "", "furniture");
        let filter = ItemFilter {
            search: Some("   ".to_string()),
            ..Default::default()
        };
        assert!(filter.matches(&lamp));
    }

    #[test]
    fn test_owner_filter() {
        let lamp = item("Lamp", "", "furniture");
        assert!(ItemFilter::by_owner(lamp.owner_id).matches(&lamp));
        assert!(!ItemFilter::by_owner(UserId(Uuid::new_v4())).matches(&lamp));
    }

    #[test]
    fn test_filter_treats_blank_values_as_absent() {
        let filter: ItemFilter = serde_json::from_value(serde_json::json!({
            "search": "",
            "category": "",
            "owner": "",
            "status": " ",
            "limit": "",
        }))
        .unwrap();
        assert!(filter.owner.is_none());
        assert!(filter.status.is_none());
        assert!(filter.limit.is_none());
        assert!(filter.matches(&item("Lamp", "", "furniture")));

        let owner = Uuid::new_v4();
        let filter: ItemFilter = serde_json::from_value(serde_json::json!({
            "owner": owner.to_string(),
            "status": "reserved",
            "limit": "5",
        }))
        .unwrap();
        assert_eq!(filter.owner, Some(UserId(owner)));
        assert_eq!(filter.status, Some(ItemStatus::Reserved));
        assert_eq!(filter.limit, Some(5));

        let bad: Result<ItemFilter, _> =
            serde_json::from_value(serde_json::json!({ "limit": "lots" }));
        assert!(bad.is_err());
    }
}

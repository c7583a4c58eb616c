//! Cached resource collections and their freshness policy.

use core::fmt;
use core::str::FromStr;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// A resource collection the client caches for offline reads.
///
/// The TTL of each collection is fixed policy and follows how fast the
/// underlying state changes: live orders and bills go stale within a minute,
/// the floor plan within minutes, the menu within the hour.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum ResourceKey {
    Tables,
    Orders,
    Menu,
    Bills,
    Reservations,
    Inventory,
    Staff,
    /// Host-defined collection; uses the medium TTL.
    Custom(String),
}

impl ResourceKey {
    /// Known collections, in a stable order.
    pub const KNOWN: [ResourceKey; 7] = [
        ResourceKey::Tables,
        ResourceKey::Orders,
        ResourceKey::Menu,
        ResourceKey::Bills,
        ResourceKey::Reservations,
        ResourceKey::Inventory,
        ResourceKey::Staff,
    ];

    pub fn custom(name: impl Into<String>) -> Self {
        Self::Custom(name.into())
    }

    /// Stable name, also used as the REST collection path segment.
    pub fn as_str(&self) -> &str {
        match self {
            ResourceKey::Tables => "tables",
            ResourceKey::Orders => "orders",
            ResourceKey::Menu => "menu",
            ResourceKey::Bills => "bills",
            ResourceKey::Reservations => "reservations",
            ResourceKey::Inventory => "inventory",
            ResourceKey::Staff => "staff",
            ResourceKey::Custom(name) => name,
        }
    }

    /// Key of the cache entry in the durable store.
    pub fn cache_key(&self) -> String {
        format!("cache:{}", self.as_str())
    }

    /// Maximum age before a cached copy must be refreshed.
    pub fn max_age(&self) -> Duration {
        match self {
            ResourceKey::Orders | ResourceKey::Bills => Duration::seconds(60),
            ResourceKey::Tables | ResourceKey::Reservations | ResourceKey::Custom(_) => {
                Duration::minutes(5)
            }
            ResourceKey::Menu | ResourceKey::Inventory | ResourceKey::Staff => Duration::hours(1),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for ResourceKey {
    fn from(value: String) -> Self {
        match value.as_str() {
            "tables" => ResourceKey::Tables,
            "orders" => ResourceKey::Orders,
            "menu" => ResourceKey::Menu,
            "bills" => ResourceKey::Bills,
            "reservations" => ResourceKey::Reservations,
            "inventory" => ResourceKey::Inventory,
            "staff" => ResourceKey::Staff,
            _ => ResourceKey::Custom(value),
        }
    }
}

impl From<ResourceKey> for String {
    fn from(value: ResourceKey) -> Self {
        match value {
            ResourceKey::Custom(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl FromStr for ResourceKey {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.contains('/') {
            return Err(DomainError::validation(format!(
                "invalid resource name: {s:?}"
            )));
        }
        Ok(ResourceKey::from(trimmed.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_follows_volatility() {
        assert!(ResourceKey::Orders.max_age() < ResourceKey::Tables.max_age());
        assert!(ResourceKey::Tables.max_age() < ResourceKey::Menu.max_age());
        assert_eq!(ResourceKey::Orders.max_age(), Duration::seconds(60));
        assert_eq!(ResourceKey::Tables.max_age(), Duration::minutes(5));
        assert_eq!(ResourceKey::Menu.max_age(), Duration::hours(1));
    }

    #[test]
    fn known_names_parse_back_to_variants() {
        for key in ResourceKey::KNOWN {
            assert_eq!(key.as_str().parse::<ResourceKey>().unwrap(), key);
        }
        assert_eq!(
            "specials".parse::<ResourceKey>().unwrap(),
            ResourceKey::custom("specials")
        );
    }

    #[test]
    fn cache_key_is_prefixed() {
        assert_eq!(ResourceKey::Tables.cache_key(), "cache:tables");
    }

    #[test]
    fn rejects_empty_and_path_like_names() {
        assert!("".parse::<ResourceKey>().is_err());
        assert!("a/b".parse::<ResourceKey>().is_err());
    }
}

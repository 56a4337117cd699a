use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;

use crate::config::CONFIG;
use crate::db::database::Database;
use crate::db::models::Entitlement;

/// Process-local view of each user's entitlement row. Rebuilt lazily per
/// user after a restart; the store stays the source of truth.
#[derive(Clone, Default)]
pub struct EntitlementCache {
    entries: Arc<Mutex<HashMap<i64, Entitlement>>>,
}

impl EntitlementCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, user_id: i64) -> Option<Entitlement> {
        self.entries.lock().get(&user_id).cloned()
    }

    pub fn insert(&self, entitlement: Entitlement) {
        self.entries.lock().insert(entitlement.user_id, entitlement);
    }

    /// Find-or-create bootstrap. Must run before any meter check for the
    /// same request; the meter fails closed on a cache miss.
    pub async fn ensure_loaded(&self, db: &Database, user_id: i64) -> Result<Entitlement> {
        if let Some(entitlement) = self.get(user_id) {
            return Ok(entitlement);
        }

        let entitlement = db
            .find_or_create_user(user_id, CONFIG.free_daily_limit)
            .await?;
        self.insert(entitlement.clone());
        Ok(entitlement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Plan;
    use chrono::Utc;

    fn entitlement(user_id: i64, daily_limit: i64) -> Entitlement {
        Entitlement {
            user_id,
            is_premium: daily_limit > 3,
            plan: if daily_limit > 3 {
                Plan::Premium
            } else {
                Plan::Free
            },
            daily_limit,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn insert_overwrites_existing_entry() {
        let cache = EntitlementCache::new();
        cache.insert(entitlement(7, 3));
        cache.insert(entitlement(7, 10));

        let cached = cache.get(7).unwrap();
        assert_eq!(cached.daily_limit, 10);
        assert_eq!(cached.plan, Plan::Premium);
    }

    #[test]
    fn miss_returns_none() {
        let cache = EntitlementCache::new();
        assert!(cache.get(42).is_none());
    }

    #[tokio::test]
    async fn ensure_loaded_creates_a_default_free_record() {
        let db = Database::init("sqlite::memory:").await.unwrap();
        let cache = EntitlementCache::new();

        let created = cache.ensure_loaded(&db, 9).await.unwrap();
        assert!(!created.is_premium);
        assert_eq!(created.plan, Plan::Free);
        assert!(cache.get(9).is_some());
    }

    #[tokio::test]
    async fn cold_cache_rebuild_keeps_an_upgraded_plan() {
        let db = Database::init("sqlite::memory:").await.unwrap();
        let warm = EntitlementCache::new();
        warm.ensure_loaded(&db, 9).await.unwrap();
        db.upgrade_user(9, 10).await.unwrap();

        // A fresh cache models a process restart: the lazy rebuild must
        // see the premium row, never a downgraded default.
        let cold = EntitlementCache::new();
        let rebuilt = cold.ensure_loaded(&db, 9).await.unwrap();
        assert!(rebuilt.is_premium);
        assert_eq!(rebuilt.plan, Plan::Premium);
        assert_eq!(rebuilt.daily_limit, 10);
    }
}

use anyhow::Result;
use chrono::{DateTime, Duration, NaiveTime, Utc};
use tracing::debug;

use crate::db::database::Database;
use crate::db::models::Feature;
use crate::entitlements::cache::EntitlementCache;

/// Decide whether `user_id` may consume `feature` now and, if so, durably
/// record the consumption. `Ok(false)` is the normal quota-exceeded
/// outcome; `Err` means the store failed and the caller must treat the
/// request as denied (never fail open).
///
/// The quota window is the current UTC calendar day, deliberately ignoring
/// the user's local timezone. The check-then-insert pair is not atomic:
/// two overlapping requests from the same user can both pass the count and
/// briefly allow limit+1. The window is one request latency; accepted.
pub async fn check_and_consume(
    db: &Database,
    cache: &EntitlementCache,
    user_id: i64,
    feature: Feature,
) -> Result<bool> {
    check_and_consume_at(db, cache, user_id, feature, Utc::now()).await
}

pub async fn check_and_consume_at(
    db: &Database,
    cache: &EntitlementCache,
    user_id: i64,
    feature: Feature,
    now: DateTime<Utc>,
) -> Result<bool> {
    // Bootstrap must have run; an absent cache entry means deny, not
    // unlimited use.
    let Some(entitlement) = cache.get(user_id) else {
        debug!(user_id, "Entitlement not resident in cache; denying");
        return Ok(false);
    };

    let (window_start, window_end) = utc_day_window(now);
    let used = db
        .count_usage_events(user_id, feature, window_start, window_end)
        .await?;

    if used >= entitlement.daily_limit {
        debug!(
            user_id,
            feature = feature.as_str(),
            used,
            limit = entitlement.daily_limit,
            "Daily quota exhausted"
        );
        return Ok(false);
    }

    db.insert_usage_event(user_id, feature, now).await?;
    Ok(true)
}

fn utc_day_window(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = now.date_naive().and_time(NaiveTime::MIN).and_utc();
    (start, start + Duration::days(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{Entitlement, Plan};
    use chrono::TimeZone;

    async fn test_db() -> Database {
        Database::init("sqlite::memory:").await.unwrap()
    }

    fn cached_free_user(cache: &EntitlementCache, user_id: i64, daily_limit: i64) {
        cache.insert(Entitlement {
            user_id,
            is_premium: false,
            plan: Plan::Free,
            daily_limit,
            created_at: Utc::now(),
        });
    }

    #[tokio::test]
    async fn denies_when_entitlement_not_cached() {
        let db = test_db().await;
        let cache = EntitlementCache::new();

        let allowed = check_and_consume(&db, &cache, 1, Feature::GenerateImage)
            .await
            .unwrap();
        assert!(!allowed);
    }

    #[tokio::test]
    async fn allows_until_limit_then_denies_without_appending() {
        let db = test_db().await;
        let cache = EntitlementCache::new();
        cached_free_user(&cache, 1, 3);

        for _ in 0..3 {
            let allowed = check_and_consume(&db, &cache, 1, Feature::GenerateImage)
                .await
                .unwrap();
            assert!(allowed);
        }

        let denied = check_and_consume(&db, &cache, 1, Feature::GenerateImage)
            .await
            .unwrap();
        assert!(!denied);

        let (start, end) = utc_day_window(Utc::now());
        let count = db
            .count_usage_events(1, Feature::GenerateImage, start, end)
            .await
            .unwrap();
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn features_are_metered_independently() {
        let db = test_db().await;
        let cache = EntitlementCache::new();
        cached_free_user(&cache, 1, 1);

        assert!(check_and_consume(&db, &cache, 1, Feature::GenerateImage)
            .await
            .unwrap());
        assert!(!check_and_consume(&db, &cache, 1, Feature::GenerateImage)
            .await
            .unwrap());
        assert!(check_and_consume(&db, &cache, 1, Feature::AnalyzeImage)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn counter_resets_at_utc_day_boundary() {
        let db = test_db().await;
        let cache = EntitlementCache::new();
        cached_free_user(&cache, 1, 1);

        let just_before_midnight = Utc
            .with_ymd_and_hms(2026, 3, 9, 23, 59, 59)
            .unwrap()
            .checked_add_signed(Duration::milliseconds(999))
            .unwrap();
        let just_after_midnight = Utc
            .with_ymd_and_hms(2026, 3, 10, 0, 0, 0)
            .unwrap()
            .checked_add_signed(Duration::milliseconds(1))
            .unwrap();

        let allowed =
            check_and_consume_at(&db, &cache, 1, Feature::GenerateCode, just_before_midnight)
                .await
                .unwrap();
        assert!(allowed);

        // Same day: exhausted.
        let denied =
            check_and_consume_at(&db, &cache, 1, Feature::GenerateCode, just_before_midnight)
                .await
                .unwrap();
        assert!(!denied);

        // Two milliseconds later the window has rolled over.
        let allowed_again =
            check_and_consume_at(&db, &cache, 1, Feature::GenerateCode, just_after_midnight)
                .await
                .unwrap();
        assert!(allowed_again);
    }

    #[tokio::test]
    async fn store_failure_surfaces_as_error_not_allow() {
        let db = test_db().await;
        let cache = EntitlementCache::new();
        cached_free_user(&cache, 1, 3);

        sqlx::query("DROP TABLE usage_events")
            .execute(db.pool())
            .await
            .unwrap();

        let result = check_and_consume(&db, &cache, 1, Feature::GenerateImage).await;
        assert!(result.is_err());
    }
}

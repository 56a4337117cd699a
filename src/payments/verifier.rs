use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::{error, info};

use crate::config::CONFIG;
use crate::db::database::Database;
use crate::entitlements::cache::EntitlementCache;
use crate::payments::indexer::{self, TransactionDetails};

static TX_HASH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"0x[0-9a-fA-F]{64}").expect("valid tx hash regex"));

#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("no 0x-prefixed transaction hash found in reference")]
    MalformedReference,
    #[error("transaction {0} has already been redeemed")]
    AlreadyRedeemed(String),
    #[error("transaction lookup failed: {0}")]
    LookupFailed(String),
    #[error("transaction did not succeed on chain")]
    TransactionFailed,
    #[error("transaction destination does not match the treasury address")]
    WrongDestination,
    #[error("transferred amount {amount} is below the premium threshold {required}")]
    InsufficientAmount { amount: f64, required: f64 },
    #[error("failed to record payment transaction: {0}")]
    PersistFailed(String),
    #[error("payment recorded but entitlement upgrade failed: {0}")]
    UpgradeFailed(String),
}

impl VerificationError {
    /// Reply copy for the failing gate. Store/provider detail stays in the
    /// logs, not in the chat.
    pub fn user_message(&self) -> String {
        match self {
            VerificationError::MalformedReference => {
                "⚠️ That doesn't look like a transaction link or hash. \
                 Send the 0x... transaction hash or an explorer link to it."
                    .to_string()
            }
            VerificationError::AlreadyRedeemed(_) => {
                "⚠️ This transaction has already been redeemed.".to_string()
            }
            VerificationError::LookupFailed(_) => {
                "❌ Couldn't find that transaction on chain. Double-check the hash \
                 and try again in a moment."
                    .to_string()
            }
            VerificationError::TransactionFailed => {
                "❌ That transaction failed on chain, so it can't be redeemed.".to_string()
            }
            VerificationError::WrongDestination => {
                "⚠️ That transaction wasn't sent to the Velix treasury address.".to_string()
            }
            VerificationError::InsufficientAmount { amount, required } => format!(
                "⚠️ The transferred amount ({amount}) is below the premium price ({required})."
            ),
            VerificationError::PersistFailed(_) | VerificationError::UpgradeFailed(_) => {
                "❌ Something went wrong while upgrading your account. \
                 Please contact support — your payment was not lost."
                    .to_string()
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpgradeConfirmation {
    pub new_daily_limit: i64,
    /// Informational only: premium does not auto-expire.
    pub valid_until: DateTime<Utc>,
}

/// Pull a 0x-prefixed 64-hex transaction id out of the reference text,
/// tolerating explorer URLs, and normalize it to lowercase.
pub fn extract_tx_hash(reference: &str) -> Option<String> {
    TX_HASH_RE
        .find(reference)
        .map(|found| found.as_str().to_lowercase())
}

/// Gates 3-5 of the verification sequence, pure so they can be exercised
/// without a live indexer. Returns the normalized transfer amount.
pub fn evaluate_transaction(
    details: &TransactionDetails,
    treasury_address: &str,
    premium_threshold: f64,
) -> Result<f64, VerificationError> {
    if !details.is_successful() {
        return Err(VerificationError::TransactionFailed);
    }

    let destination = details
        .destination()
        .ok_or(VerificationError::WrongDestination)?;
    if !destination.eq_ignore_ascii_case(treasury_address.trim()) {
        return Err(VerificationError::WrongDestination);
    }

    // A successful receipt with unusable transfer data is an indexer
    // problem, not a failed transaction.
    let amount = details.transfer_amount().ok_or_else(|| {
        VerificationError::LookupFailed("transfer amount missing from indexer data".to_string())
    })?;
    if amount < premium_threshold {
        return Err(VerificationError::InsufficientAmount {
            amount,
            required: premium_threshold,
        });
    }

    Ok(amount)
}

/// Validate a payment reference against the chain indexer and upgrade the
/// user's entitlement. Each gate short-circuits; the payment-row insert is
/// the authoritative at-most-once redemption point (the early lookup is
/// only a best-effort fast path).
pub async fn verify_and_upgrade(
    db: &Database,
    cache: &EntitlementCache,
    user_id: i64,
    reference: &str,
) -> Result<UpgradeConfirmation, VerificationError> {
    let tx_hash = extract_tx_hash(reference).ok_or(VerificationError::MalformedReference)?;

    match db.find_payment(&tx_hash).await {
        Ok(Some(_)) => return Err(VerificationError::AlreadyRedeemed(tx_hash)),
        Ok(None) => {}
        Err(err) => return Err(VerificationError::LookupFailed(err.to_string())),
    }

    let details = indexer::fetch_transaction(&tx_hash)
        .await
        .map_err(|err| VerificationError::LookupFailed(err.to_string()))?
        .ok_or_else(|| VerificationError::LookupFailed("transaction not found".to_string()))?;

    let amount = evaluate_transaction(
        &details,
        &CONFIG.treasury_address,
        CONFIG.premium_threshold,
    )?;

    record_and_upgrade(db, cache, user_id, &tx_hash, amount).await
}

/// Steps 7-9: persist the redemption, flip the entitlement, refresh the
/// cache.
pub async fn record_and_upgrade(
    db: &Database,
    cache: &EntitlementCache,
    user_id: i64,
    tx_hash: &str,
    amount: f64,
) -> Result<UpgradeConfirmation, VerificationError> {
    let recorded_at = Utc::now();
    db.insert_payment(tx_hash, user_id, amount, recorded_at)
        .await
        .map_err(|err| VerificationError::PersistFailed(err.to_string()))?;

    let entitlement = db
        .upgrade_user(user_id, CONFIG.premium_daily_limit)
        .await
        .map_err(|err| {
            // The transaction row is already in; this state needs manual
            // reconciliation, so keep the hash in the log.
            error!(user_id, tx_hash, "Entitlement upgrade failed after payment was recorded: {err}");
            VerificationError::UpgradeFailed(err.to_string())
        })?;

    cache.insert(entitlement.clone());
    info!(
        user_id,
        tx_hash, amount, "Premium upgrade complete (daily limit {})", entitlement.daily_limit
    );

    Ok(UpgradeConfirmation {
        new_daily_limit: entitlement.daily_limit,
        valid_until: recorded_at + Duration::days(7),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::indexer::TransactionDetails;

    const HASH: &str = "0x19c272fd553fb51ed226ab16c25b84ac1a2c92f04ba42bbfbde1928b453b5701";

    fn details(destination: &str, data: &str, status: &str) -> TransactionDetails {
        serde_json::from_str(&format!(
            r#"{{
                "logs": [{{"topic1": "0xsender", "topic2": "{destination}", "data": "{data}"}}],
                "receipt_status": "{status}"
            }}"#
        ))
        .unwrap()
    }

    #[test]
    fn extracts_hash_from_plain_text_and_urls() {
        assert_eq!(extract_tx_hash(HASH).as_deref(), Some(HASH));
        assert_eq!(
            extract_tx_hash(&format!("https://basescan.org/tx/{HASH}")).as_deref(),
            Some(HASH)
        );
        assert_eq!(
            extract_tx_hash(&HASH.to_uppercase().replace("0X", "0x")).as_deref(),
            Some(HASH)
        );
    }

    #[test]
    fn rejects_references_without_a_full_hash() {
        assert!(extract_tx_hash("").is_none());
        assert!(extract_tx_hash("0x1234").is_none());
        assert!(extract_tx_hash("deadbeef").is_none());
        // 63 hex chars: one short.
        assert!(extract_tx_hash(&format!("0x{}", "a".repeat(63))).is_none());
    }

    #[test]
    fn evaluate_rejects_failed_transactions() {
        let tx = details("0xtreasury", "25000000", "0");
        assert!(matches!(
            evaluate_transaction(&tx, "0xtreasury", 25.0),
            Err(VerificationError::TransactionFailed)
        ));
    }

    #[test]
    fn evaluate_compares_destination_case_insensitively() {
        let tx = details("0xABCDEF", "25000000", "1");
        assert!(evaluate_transaction(&tx, "0xabcdef", 25.0).is_ok());
        assert!(matches!(
            evaluate_transaction(&tx, "0xother", 25.0),
            Err(VerificationError::WrongDestination)
        ));
    }

    #[test]
    fn unusable_transfer_data_reads_as_lookup_failure_not_tx_failure() {
        let no_data: TransactionDetails = serde_json::from_str(
            r#"{"logs": [{"topic1": "0xsender", "topic2": "0xtreasury"}], "receipt_status": "1"}"#,
        )
        .unwrap();
        assert!(matches!(
            evaluate_transaction(&no_data, "0xtreasury", 25.0),
            Err(VerificationError::LookupFailed(_))
        ));

        let garbage = details("0xtreasury", "not-a-number", "1");
        assert!(matches!(
            evaluate_transaction(&garbage, "0xtreasury", 25.0),
            Err(VerificationError::LookupFailed(_))
        ));
    }

    #[test]
    fn evaluate_enforces_the_premium_threshold_inclusively() {
        let exact = details("0xtreasury", "25000000", "1");
        assert_eq!(evaluate_transaction(&exact, "0xtreasury", 25.0).unwrap(), 25.0);

        let short = details("0xtreasury", "24999999", "1");
        assert!(matches!(
            evaluate_transaction(&short, "0xtreasury", 25.0),
            Err(VerificationError::InsufficientAmount { .. })
        ));
    }

    #[tokio::test]
    async fn second_redemption_of_same_hash_is_rejected_early() {
        let db = Database::init("sqlite::memory:").await.unwrap();
        let cache = EntitlementCache::new();
        db.find_or_create_user(1, 3).await.unwrap();
        cache.ensure_loaded(&db, 1).await.unwrap();

        record_and_upgrade(&db, &cache, 1, HASH, 25.0).await.unwrap();

        let second = verify_and_upgrade(&db, &cache, 2, HASH).await;
        assert!(matches!(second, Err(VerificationError::AlreadyRedeemed(_))));
    }

    #[tokio::test]
    async fn duplicate_insert_hits_the_uniqueness_constraint() {
        let db = Database::init("sqlite::memory:").await.unwrap();
        let cache = EntitlementCache::new();
        db.find_or_create_user(1, 3).await.unwrap();
        cache.ensure_loaded(&db, 1).await.unwrap();

        record_and_upgrade(&db, &cache, 1, HASH, 25.0).await.unwrap();
        let raced = record_and_upgrade(&db, &cache, 1, HASH, 25.0).await;
        assert!(matches!(raced, Err(VerificationError::PersistFailed(_))));
    }

    #[tokio::test]
    async fn upgrade_refreshes_the_cache_immediately() {
        let db = Database::init("sqlite::memory:").await.unwrap();
        let cache = EntitlementCache::new();
        db.find_or_create_user(1, 3).await.unwrap();
        cache.ensure_loaded(&db, 1).await.unwrap();
        assert_eq!(cache.get(1).unwrap().daily_limit, 3);

        let confirmation = record_and_upgrade(&db, &cache, 1, HASH, 25.0).await.unwrap();
        assert_eq!(confirmation.new_daily_limit, CONFIG.premium_daily_limit);

        let cached = cache.get(1).unwrap();
        assert!(cached.is_premium);
        assert_eq!(cached.daily_limit, CONFIG.premium_daily_limit);
    }
}

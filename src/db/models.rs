use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// The three billable capabilities, keyed by their stable store names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    GenerateImage,
    AnalyzeImage,
    GenerateCode,
}

impl Feature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::GenerateImage => "generate-image",
            Feature::AnalyzeImage => "analyze-image",
            Feature::GenerateCode => "generate-code",
        }
    }

    /// Product name shown in user-facing copy.
    pub fn display_name(&self) -> &'static str {
        match self {
            Feature::GenerateImage => "VelixGen",
            Feature::AnalyzeImage => "VelixVision",
            Feature::GenerateCode => "CodeMorph",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Free,
    Premium,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Entitlement {
    pub user_id: i64,
    pub is_premium: bool,
    pub plan: Plan,
    pub daily_limit: i64,
    pub created_at: DateTime<Utc>,
}

#[allow(dead_code)]
#[derive(Debug, Clone, FromRow)]
pub struct PaymentTransaction {
    pub tx_hash: String,
    pub user_id: i64,
    pub amount: f64,
    pub recorded_at: DateTime<Utc>,
}

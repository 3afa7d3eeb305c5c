//! Destination database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::Result;
use crate::database::time::now_ms;
use crate::domain::{DestinationConfig, RateLimitPolicy};

/// One row of `destinations`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DestinationDbModel {
    pub id: String,
    pub name: String,
    pub api_endpoint: String,
    /// i64::MAX stands for "no limit"
    pub max_size_bytes: i64,
    /// JSON array of formats
    pub supported_formats: String,
    /// JSON array of metadata field names
    pub required_fields: String,
    pub daily_limit: Option<i64>,
    pub hourly_limit: Option<i64>,
    pub updated_at: i64,
}

impl DestinationDbModel {
    pub fn from_config(config: &DestinationConfig) -> Result<Self> {
        Ok(Self {
            id: config.id.clone(),
            name: config.name.clone(),
            api_endpoint: config.api_endpoint.clone(),
            max_size_bytes: i64::try_from(config.max_size_bytes).unwrap_or(i64::MAX),
            supported_formats: serde_json::to_string(&config.supported_formats)?,
            required_fields: serde_json::to_string(&config.required_fields)?,
            daily_limit: config.rate_limit.map(|p| i64::from(p.daily)),
            hourly_limit: config.rate_limit.map(|p| i64::from(p.hourly)),
            updated_at: now_ms(),
        })
    }

    pub fn into_config(self) -> Result<DestinationConfig> {
        let max_size_bytes = if self.max_size_bytes == i64::MAX {
            u64::MAX
        } else {
            u64::try_from(self.max_size_bytes).unwrap_or(0)
        };
        let limit = |v: i64| u32::try_from(v).unwrap_or(u32::MAX);
        let rate_limit = match (self.daily_limit, self.hourly_limit) {
            (Some(daily), Some(hourly)) => Some(RateLimitPolicy::new(limit(daily), limit(hourly))),
            _ => None,
        };

        Ok(DestinationConfig {
            id: self.id,
            name: self.name,
            api_endpoint: self.api_endpoint,
            max_size_bytes,
            supported_formats: serde_json::from_str(&self.supported_formats)?,
            required_fields: serde_json::from_str(&self.required_fields)?,
            rate_limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlimited_size_survives() {
        let config = DestinationConfig::new("vimeo", "Vimeo").with_formats(["mp4"]);
        let row = DestinationDbModel::from_config(&config).unwrap();
        assert_eq!(row.max_size_bytes, i64::MAX);
        assert_eq!(row.daily_limit, None);
        assert_eq!(row.into_config().unwrap(), config);
    }

    #[test]
    fn test_builtin_row() {
        let row = DestinationDbModel::from_config(&DestinationConfig::tiktok()).unwrap();
        assert_eq!(row.daily_limit, Some(10));
        assert_eq!(row.hourly_limit, Some(3));
        assert_eq!(row.supported_formats, r#"["mp4","mov","avi"]"#);
    }
}

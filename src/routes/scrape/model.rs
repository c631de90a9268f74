use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{cache::LookupSource, orchestrator::ScrapeOutcome, parser::ParsedPage};

#[derive(Debug, Deserialize)]
pub struct ScrapeQuery {
    pub url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ScrapeResponse {
    pub fingerprint: String,
    pub site: &'static str,
    pub site_name: &'static str,
    pub source: LookupSource,
    pub stored_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub page: ParsedPage,
    pub remaining_requests: Option<u32>,
}

impl From<ScrapeOutcome> for ScrapeResponse {
    fn from(outcome: ScrapeOutcome) -> Self {
        let entry = outcome.lookup.entry;
        Self {
            fingerprint: outcome.fingerprint,
            site: outcome.site.id,
            site_name: outcome.site.name,
            source: outcome.lookup.source,
            stored_at: DateTime::from_timestamp_millis(entry.stored_at_ms),
            expires_at: DateTime::from_timestamp_millis(entry.expires_at_ms),
            page: entry.value,
            remaining_requests: outcome.remaining,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct InvalidateResponse {
    pub fingerprint: String,
    pub invalidated: bool,
    pub remaining_requests: Option<u32>,
}

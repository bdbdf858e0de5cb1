//! Shared fixtures for the Tidal benchmarks.

use serde_json::{json, Value};
use tidal_protocol::{Record, RecordSchema};

/// Owner used by every fixture row.
pub const OWNER: &str = "bench@tidal.dev";

/// Collection used by every fixture row.
pub const COLLECTION: &str = "processed_emails";

/// A row shaped like a processed email.
#[must_use]
pub fn row(id: u64) -> Value {
    json!({
        "id": id,
        "from_email": OWNER,
        "created_at": format!("2024-05-01T10:{:02}:{:02}Z", (id / 60) % 60, id % 60),
        "subject": format!("Message {}", id),
        "summary": "Quarterly numbers attached, please review before Friday.",
        "labels": ["inbox", "finance"],
        "raw_id": null,
    })
}

/// `count` rows, newest first.
#[must_use]
pub fn rows(count: u64) -> Vec<Value> {
    (0..count).rev().map(row).collect()
}

/// `count` records, newest first.
#[must_use]
pub fn records(count: u64) -> Vec<Record> {
    let schema = RecordSchema::default();
    rows(count)
        .into_iter()
        .filter_map(|r| Record::from_row(r, &schema).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixtures_parse() {
        let records = records(10);
        assert_eq!(records.len(), 10);
        assert_eq!(records[0].id.as_str(), "9");
        assert_eq!(records[0].owner_key.as_deref(), Some(OWNER));
    }
}

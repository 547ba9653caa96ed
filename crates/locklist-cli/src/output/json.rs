//! JSON output formatting.

use locklist_core::types::LocalList;

/// Convert a list, items included, to JSON for output.
pub fn list_json(list: &LocalList) -> serde_json::Value {
    serde_json::json!({
        "title": list.title,
        "storage_key": list.storage_key,
        "last_modified": list.last_modified,
        "records": list.records.iter().map(|record| serde_json::json!({
            "id": record.id,
            "text": record.text,
            "completed": record.completed,
            "created_at": record.created_at,
            "updated_at": record.updated_at,
        })).collect::<Vec<_>>(),
    })
}

/// Summaries of every list, without items.
pub fn lists_json(lists: &[LocalList]) -> Vec<serde_json::Value> {
    lists
        .iter()
        .map(|list| {
            serde_json::json!({
                "title": list.title,
                "storage_key": list.storage_key,
                "items": list.records.len(),
                "open": list.records.iter().filter(|record| !record.completed).count(),
                "last_modified": list.last_modified,
            })
        })
        .collect()
}

pub fn status_json(
    uid: Option<&str>,
    state: &str,
    key_fingerprint: Option<&str>,
    pending: &[String],
    unreadable: &[String],
) -> serde_json::Value {
    serde_json::json!({
        "uid": uid,
        "state": state,
        "key_fingerprint": key_fingerprint,
        "pending": pending,
        "unreadable": unreadable,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts_open_items() {
        let mut list = LocalList::new("To Do", "list-storage-todo");
        list.records.push(locklist_core::types::Record::new("a"));
        let mut done = locklist_core::types::Record::new("b");
        done.completed = true;
        list.records.push(done);

        let summary = lists_json(&[list]);
        assert_eq!(summary[0]["items"], 2);
        assert_eq!(summary[0]["open"], 1);
        assert_eq!(summary[0]["storage_key"], "list-storage-todo");
    }
}

//! Argument resolution helpers for the CLI.

use locklist_core::types::{LocalList, Record, LIST_STORAGE_PREFIX};
use locklist_core::LocalStore;

use crate::errors::CliError;

/// Find a list by storage key, slug or title (case-insensitive).
pub async fn resolve_list(local: &LocalStore, name: &str) -> anyhow::Result<LocalList> {
    let name = name.trim();
    let lists = local.load_all().await?;
    let wanted_key = if name.starts_with(LIST_STORAGE_PREFIX) {
        name.to_string()
    } else {
        format!("{}{}", LIST_STORAGE_PREFIX, name.to_lowercase())
    };

    if let Some(list) = lists.iter().find(|list| list.storage_key == wanted_key) {
        return Ok(list.clone());
    }
    let mut by_title = lists
        .iter()
        .filter(|list| list.title.eq_ignore_ascii_case(name));
    match (by_title.next(), by_title.next()) {
        (Some(list), None) => Ok(list.clone()),
        (Some(_), Some(_)) => Err(CliError::invalid_input(format!(
            "More than one list is titled \"{}\"; use its storage key.",
            name
        ))
        .into()),
        _ => Err(CliError::not_found(
            format!("List \"{}\" not found", name),
            "Hint: run `locklist lists` to see every list.",
        )
        .into()),
    }
}

/// Find an item by its number in `locklist show` or by id prefix.
pub fn resolve_record<'a>(list: &'a LocalList, selector: &str) -> anyhow::Result<&'a Record> {
    let selector = selector.trim();
    if let Ok(position) = selector.parse::<usize>() {
        return match position.checked_sub(1).and_then(|index| list.records.get(index)) {
            Some(record) => Ok(record),
            None => Err(CliError::not_found(
                format!("\"{}\" has no item {}", list.title, position),
                format!("Hint: run `locklist show {}`.", list.storage_key),
            )
            .into()),
        };
    }

    let selector = selector.to_lowercase();
    let mut matches = list
        .records
        .iter()
        .filter(|record| record.id.to_string().starts_with(&selector));
    match (matches.next(), matches.next()) {
        (Some(record), None) => Ok(record),
        (Some(_), Some(_)) => Err(CliError::invalid_input(format!(
            "Item id prefix \"{}\" is ambiguous",
            selector
        ))
        .into()),
        _ => Err(CliError::not_found(
            format!("No item matching \"{}\" in \"{}\"", selector, list.title),
            format!("Hint: run `locklist show {}`.", list.storage_key),
        )
        .into()),
    }
}

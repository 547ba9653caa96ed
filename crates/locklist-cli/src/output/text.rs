//! Plain text output.

use chrono::Local;

use locklist_core::types::LocalList;

/// One line per list: title, open/total items and storage key.
pub fn print_lists(lists: &[LocalList], quiet: bool) {
    if !quiet {
        println!("LIST | OPEN/TOTAL | KEY");
    }
    for list in lists {
        let open = list.records.iter().filter(|record| !record.completed).count();
        println!(
            "{} | {}/{} | {}",
            list.title,
            open,
            list.records.len(),
            list.storage_key
        );
    }
}

/// Items numbered from 1; the number addresses the item in other commands.
pub fn print_list(list: &LocalList, quiet: bool) {
    if !quiet {
        println!(
            "{} (updated {})",
            list.title,
            list.last_modified
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M")
        );
    }
    if list.records.is_empty() && !quiet {
        println!("  (empty)");
    }
    for line in item_lines(list) {
        println!("{}", line);
    }
}

fn item_lines(list: &LocalList) -> Vec<String> {
    list.records
        .iter()
        .enumerate()
        .map(|(index, record)| {
            let mark = if record.completed { "x" } else { " " };
            format!("{:>3}. [{}] {}", index + 1, mark, record.text)
        })
        .collect()
}

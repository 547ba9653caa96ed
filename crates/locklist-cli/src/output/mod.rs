//! Output formatting for lists and status.

mod json;
mod text;

pub use json::{list_json, lists_json, status_json};
pub use text::{print_list, print_lists};

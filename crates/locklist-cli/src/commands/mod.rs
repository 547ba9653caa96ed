//! Command handlers.

mod account;
mod lists;
mod sync;

pub use account::{handle_init, handle_login, handle_logout, handle_passwd, handle_status};
pub use lists::{
    handle_add, handle_delete_list, handle_edit, handle_lists, handle_new_list, handle_rm,
    handle_set_completed, handle_show,
};
pub use sync::{handle_sync, handle_watch};

//! Application wiring: context, passphrase flow and the saved session.

mod context;
mod passphrase;
mod session;

pub use context::AppContext;
pub use passphrase::change_passphrase;

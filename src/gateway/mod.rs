//! Gateway server implementation

mod router;
mod server;

pub use router::{AppState, create_router, not_found_handler};
pub use server::Gateway;

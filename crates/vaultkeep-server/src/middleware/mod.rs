//! Request-pipeline middleware layers (§4.9), applied outermost to
//! innermost: [`server_header`], [`restrictions`], [`cors`], then
//! session/account resolution happens inside `extract::AuthState` at the
//! handler boundary rather than as a blanket layer, since only restricted
//! resources need it (§4.10: base resources are unauthenticated).
//! `server_header` sits outermost so it stamps `Server:` (§6) even on
//! responses the restrictions/CORS stages reject before any handler runs.

pub mod cors;
pub mod restrictions;
pub mod server_header;

pub use cors::cors;
pub use restrictions::restrictions;
pub use server_header::server_header;

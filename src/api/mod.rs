pub mod form_extractor;
pub mod handlers;
pub mod routes;

pub use form_extractor::*;
pub use handlers::*;
pub use routes::*;

//! Request extractors.

pub mod context;
pub mod path;

pub use context::{RequestContext, APPLICATION_HEADER, PRINCIPAL_HEADER};
pub use path::EntityPath;

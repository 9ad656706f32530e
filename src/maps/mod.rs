//! Map image submissions: one current image per (mission, owner), validated
//! before it is stored and reviewed by judges after.

pub mod access;
pub mod coordinator;
pub mod error;
pub mod locks;
pub mod repository;
pub mod validator;

pub use access::AccessPolicy;
pub use coordinator::{MapCoordinator, MapImage};
pub use error::MapError;
pub use repository::MapRepository;

pub mod errors;
pub mod id;

pub use errors::{ApiError, ChatError, TransportError};
pub use id::{new_id, LocalRef};

pub type Result<T> = std::result::Result<T, ChatError>;

// HTTP adapter over the vault

pub mod identity;
pub mod keys;

pub use identity::{extract_user_id, IdentityError};
pub use keys::{create_keys_router, KeysAppState};

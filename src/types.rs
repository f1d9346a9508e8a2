use std::sync::{Arc, RwLock};

/// shared-ownership, interior-mutable handle; the crate's `Arc<RwLock<T>>`
/// shorthand wherever a collaborator or test fixture needs one.
pub type Pod<T> = Arc<RwLock<T>>;

pub fn pod<T>(v: T) -> Pod<T> {
    Arc::new(RwLock::new(v))
}

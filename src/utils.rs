pub mod backoff;
pub mod handy_lock;

pub use handy_lock::HandyRwLock;

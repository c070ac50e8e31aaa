pub mod identity;

pub use identity::{CallerIdentity, Role};

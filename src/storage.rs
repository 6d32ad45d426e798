// `template` declares the `enum_dispatch` trait and must come before the
// backends that dispatch through it.
pub mod template;
pub mod backends;
mod binary;
mod metadata;

pub use binary::{BinaryStore, StoreState};
pub use metadata::MetadataStore;

//! The managed/cloud backend: authoritative sqlite metadata, a remote
//! vector index, and an object store for over-threshold content, tied
//! together with a background reconciler (spec §4.F).

mod object_store;
mod reconciler;
mod store;
mod vector_index;

pub use object_store::{generate_encryption_key, object_key_for, ObjectStore, OBJECT_KEY_PREFIX};
pub use reconciler::Reconciler;
pub use store::CloudStore;
pub use vector_index::{HttpVectorIndexClient, VectorIndexClient, VectorMatch};

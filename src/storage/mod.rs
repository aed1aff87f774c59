pub mod cache;
pub mod codec;
pub mod collection;
pub mod collection_store;
pub mod record;

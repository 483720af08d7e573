//! Integration tests for the edgesync node store and tree sync

mod config_loading;
mod hash_properties;
mod link_lifecycle;
mod store_mutation;
mod sync_convergence;
mod test_utils;

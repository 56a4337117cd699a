pub mod indexer;
pub mod verifier;

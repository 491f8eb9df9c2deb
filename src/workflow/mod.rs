pub mod engine;
pub mod error;
pub mod mutator;
pub mod policy;
pub mod session;

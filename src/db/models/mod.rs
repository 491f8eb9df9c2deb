pub mod policy;
pub mod requests;

pub mod policies;
pub mod requests;

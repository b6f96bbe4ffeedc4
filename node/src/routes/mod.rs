pub mod claim;
pub mod enqueue;
pub mod health;
pub mod interchain_auth;
pub mod receipt;

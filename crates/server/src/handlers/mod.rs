pub mod chain;
pub mod keys;

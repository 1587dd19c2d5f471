#[cfg(test)]
mod memory_account_repository;
mod pg_account_repository;

#[cfg(test)]
pub use memory_account_repository::*;
pub use pg_account_repository::*;

pub mod lock_manager;
pub mod transaction;
pub mod transaction_manager;

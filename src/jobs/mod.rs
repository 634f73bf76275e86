pub mod fill_history_sync;
pub mod vault_state_sync;

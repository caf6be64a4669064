pub mod free_slot;
pub mod layout;
pub mod models;
pub mod quick_capture;

pub mod api;
pub mod events;
pub mod models;

/// Reserved sender identity for day separators and other synthetic messages.
pub const SYSTEM_USER_ID: i64 = 0;

pub mod auth;
pub mod chat;
pub mod health;
pub mod journals;
pub mod meditations;
pub mod profile;
pub mod tasks;
pub mod ws;

pub mod chat;
pub mod journal;
pub mod meditation;
pub mod task;
pub mod user;

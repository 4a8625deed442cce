//! Application services: the server actions behind pages and the JSON API.

pub mod activity;
pub mod error;
pub mod identity;
pub mod notifications;
pub mod pagination;
pub mod realtime;
pub mod repos;
pub mod stream;
pub mod threads;
pub mod users;

//! Askama view models and the templates they feed.

pub mod views;

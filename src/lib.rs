//! Threadline: short threads, replies, likes, mentions and an activity feed.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
pub mod presentation;

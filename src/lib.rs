pub mod api;
pub mod broadcast;
pub mod common;
pub mod detector;
pub mod membership;
pub mod network;
pub mod resolver;

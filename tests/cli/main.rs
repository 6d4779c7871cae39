#[path = "../common/mod.rs"]
mod common;

mod e2e;
mod metadata;

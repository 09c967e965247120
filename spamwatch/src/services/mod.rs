//! Composition root.

mod container;

pub use container::{Repositories, ServiceContainer};

//! Dependency graph construction and deterministic ordering.
//!
//! The graph is derived from two sources: references inside resource inputs
//! and explicit `depends_on` declarations. An edge `B -> A` means "B must be
//! applied before A starts applying".

mod builder;

pub use builder::DependencyGraph;

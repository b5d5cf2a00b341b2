// sluice/src/container/mod.rs

//! Declarative container specifications and host references.

pub mod exec;
pub mod host;
pub mod spec;

pub use exec::ExecStep;
pub use host::{Host, HostDirectory};
pub use spec::{ContainerSpec, Mount};

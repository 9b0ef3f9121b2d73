//! Cluster fan-out.
//!
//! A fan-out sends one HTTP request per target unit, each as its own queued
//! job, and gathers the replies into a map keyed by unit. Targets that fail
//! for any reason map to `None`; the fan-out itself only fails on a bad
//! endpoint.

mod dispatcher;
mod endpoint;
mod resolver;

pub use dispatcher::{ClusterDispatcher, DispatchError, FanoutRequest, FanoutResult, Method};
pub use endpoint::{UNIT_API_PREFIX, UnitApiPath};
pub use resolver::{
    AddressResolver, HostnameResolver, ResolveError, StaticResolver, WorkerRegistryResolver,
};

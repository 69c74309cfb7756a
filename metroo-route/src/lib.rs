#![forbid(unsafe_code)]

//! Muti Metroo routing information base.
//!
//! Distance-vector tables for agent, CIDR, and domain reachability. Loop
//! freedom comes from the path vector: an advertisement whose path already
//! contains the receiver is dropped, and every installed route excludes the
//! local agent from its path. One readers-writer lock guards the tables;
//! lookups on the data path take the read side and never hold it across I/O.

mod rib;

pub use rib::{AdvOutcome, Resolution, RouteEntry, RouteSnapshot, Router};

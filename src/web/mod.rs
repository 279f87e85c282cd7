//! HTTP surface that modules mount their controllers onto.
//!
//! The orchestrator only sees the [`Router`] trait; [`RouteTable`] is the
//! in-process binding table and [`server`] exposes it over warp.

pub mod router;
pub mod server;

pub use router::{
    Handler, Method, Nested, Request, Response, RouteError, RouteTable, Router, RouterExt,
};
pub use server::serve;

//! Dispatch lifecycle tests: enqueue, reservation, dispatch, completion, sweep
//!
//! Runs the queue against in-memory stores and mock collaborators.

#![allow(dead_code)]

mod common;
mod dispatch_flow;
mod reservation;
mod sweeper_flow;

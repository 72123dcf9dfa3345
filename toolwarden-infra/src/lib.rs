//! Concrete infrastructure for the tool authorization pipeline: approval
//! channels, audit backends, session locks and shared rate limiting.

pub mod infra;

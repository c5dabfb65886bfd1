//! Testing utilities for arbench-core.
//!
//! Mocks for sessions, session factories, battery sensors, hardware probes
//! and accelerator queries, usable from unit and integration tests.
//!
//! ```rust,ignore
//! use arbench_core::testing::{MockSession, MockSessionFactory};
//!
//! let factory = MockSessionFactory::new().failing(BackendKind::Accelerated);
//! ```

pub mod mocks;

pub use mocks::*;

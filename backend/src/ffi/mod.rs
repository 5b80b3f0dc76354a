//! Python bindings (feature `pyo3`)
//!
//! JSON crosses the boundary in both directions; amounts are Python ints.

pub mod registry;

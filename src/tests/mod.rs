//! tests/mod.rs
//! Pruebas del servicio. Cada test usa su propia base SQLite temporal.

#[macro_use]
mod support;

mod normalizer_tests;

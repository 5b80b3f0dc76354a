//! Core primitives shared by every lending component

pub mod time;

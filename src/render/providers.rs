//! Resource providers that stand in for a graphics API.

pub mod null;

//! HTTP route handlers

pub mod predictions;

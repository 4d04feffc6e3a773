//! Runner integration tests against a scripted stand-in for the tool.

#![cfg(unix)]

mod common;
mod lifecycle_tests;

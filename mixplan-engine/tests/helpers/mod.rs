//! Test Helper Utilities
//!
//! Shared fixtures for the engine integration tests

#![allow(dead_code)]

pub mod db_utils;
pub mod scripted_generator;

pub use db_utils::{create_test_db, rated_setup, seed_location, test_config};
pub use scripted_generator::{
    hardware_response, profile_response, structured_response, Script, ScriptedGenerator,
};

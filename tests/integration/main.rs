//! Integration tests for Skill Observatory
//!
//! `crawl_tests` drives the orchestrator with in-process fake registries;
//! `index_source_tests` runs the HTTP index registry against wiremock.

mod common;
mod crawl_tests;
mod index_source_tests;

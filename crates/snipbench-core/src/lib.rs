//! Core engine for snipbench snippet benchmarking.
//!
//! This crate provides:
//! - An embedded interpreter for the snippet language
//! - Snippet sandboxing, validation and dependency loading
//! - A timing engine and the staged run orchestrator
//! - The worker IPC protocol and host-side run manager
//! - Suite state and the share-link interface

pub mod config;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod loader;
pub mod model;
pub mod orchestrator;
pub mod postprocess;
pub mod sandbox;
pub mod script;
pub mod share;
pub mod suite;
pub mod validate;

pub use config::{EngineConfig, WorkerConfig};
pub use engine::{MeasurementEngine, MeasurementKind, Report, RunOptions, TimingEngine};
pub use error::{Error, Result};
pub use ipc::{RunManager, WorkerRequest, WorkerResponse};
pub use loader::DependencyLoader;
pub use model::{BenchmarkResult, Dependency, DependencyMode, Progress, RunRequest, TestCase};
pub use orchestrator::Orchestrator;
pub use postprocess::{RankedResult, rank};
pub use sandbox::{Callable, Realm};
pub use share::{ExpiringStore, ExpiryOption, ShareService, ShareSnapshot};
pub use suite::Suite;
pub use validate::{
    DependencyValidation, ValidationResult, validate_dependencies, validate_setup, validate_syntax,
    validate_with_dry_run,
};

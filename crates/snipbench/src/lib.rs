//! snipbench: compare the speed of small script snippets.
//!
//! snipbench measures several snippets of a JavaScript subset against each
//! other. Each run happens in a separate `snipbench-worker` process:
//! - **Safe compilation**: every snippet is compiled and dry-run before
//!   measurement, so authoring mistakes become per-snippet errors
//! - **Shared setup**: one setup body produces the `GLOBAL` value every
//!   snippet sees
//! - **Dependencies**: modules and global scripts loaded from `file://` or
//!   `http(s)://` URLs
//! - **Cancellation**: a run can be abandoned by killing the worker
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use snipbench::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> snipbench::Result<()> {
//!     let manager = RunManager::new(WorkerConfig::default());
//!     let suite = Suite::default();
//!     let results = manager.run(suite.to_request(), |p| eprintln!("{}", p.name)).await?;
//!     print!("{}", render_table(&rank(&results)));
//!     Ok(())
//! }
//! ```
//!
//! For the lower level pieces (interpreter, orchestrator, engine), see the
//! `snipbench-core` crate.

pub mod render;

pub mod prelude {
    //! Common imports for driving benchmark runs.
    //!
    //! ```rust,ignore
    //! use snipbench::prelude::*;
    //! ```

    pub use crate::render::{render_table, summary_line};
    pub use snipbench_core::{
        BenchmarkResult, Dependency, DependencyMode, EngineConfig, Progress, RankedResult,
        RunManager, RunRequest, Suite, TestCase, WorkerConfig, rank,
    };
}

pub use render::{render_table, summary_line};
pub use snipbench_core::{Error, Result};

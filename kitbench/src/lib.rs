//! kitbench - multi-instance benchmark harness for database engines.
//!
//! kitbench provisions one working directory and engine configuration per
//! instance, starts the engine processes pinned to their CPU sets, drives them
//! through a scripted command sequence over a line-based TCP protocol, and
//! collects the throughput each instance reports into a single results file.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                           Driver                                │
//! │   ┌────────────────────────────────────────────────────────┐   │
//! │   │                   RunCoordinator                        │   │
//! │   │  ConfigMaterializer   Instance × N   LogScraper         │   │
//! │   └────────────────────────────────────────────────────────┘   │
//! │        │ track / release                  ▲ kill_all           │
//! │        ▼                                  │                    │
//! │   InstanceRegistry  ◄──────────────  InterruptHandler          │
//! └────────────────────────────────────────────────────────────────┘
//!         │ spawn, control socket, log polling
//!         ▼
//!    ┌──────────┐ ┌──────────┐     ┌──────────┐
//!    │ engine 0 │ │ engine 1 │ ... │ engine N │
//!    └──────────┘ └──────────┘     └──────────┘
//! ```

pub mod config;
pub mod coordinator;
pub mod driver;
pub mod instance;
pub mod interrupt;
pub mod materialize;
pub mod readiness;
pub mod registry;
pub mod results;
pub mod scraper;
pub mod state;

pub use config::{HarnessConfig, RunDefinition};
pub use coordinator::{RunCoordinator, RunError, RunSummary};
pub use driver::Driver;
pub use instance::{Instance, InstanceError, InstanceLayout, InstanceSpec};
pub use interrupt::InterruptHandler;
pub use readiness::{LogTailProbe, Readiness, ReadinessProbe};
pub use registry::{InstanceRegistry, ProcessSlot};
pub use scraper::{LogScraper, Metrics};
pub use state::InstanceState;

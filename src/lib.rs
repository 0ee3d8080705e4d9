// ─────────────────────────────────────────────────────────────────────────────
//  buildtools_core  —  public library API
//
//  cache check → download → verify → extract → swap → mark
//  plus the gn/ninja front half: regeneration gate and executor.
// ─────────────────────────────────────────────────────────────────────────────

pub mod accelerator;
pub mod artifact;
pub mod cache;
pub mod checksum;
pub mod config;
pub mod download;
pub mod env;
pub mod error;
pub mod executor;
pub mod install;
pub mod pipeline;
pub mod regen;
pub mod resolver;
pub mod runner;
pub mod sdk;

pub use accelerator::Accelerator;
pub use artifact::{ArchiveKind, ArtifactSpec, MarkerKind};
pub use cache::{CacheStore, InstallMarker};
pub use checksum::{Checksum, ChecksumAlgorithm};
pub use config::{AcceleratorMode, Config};
pub use download::{Downloader, HttpTransfer, Transfer};
pub use env::{Arch, Environment, OsFamily};
pub use error::{Result, ToolsError};
pub use executor::{BuildRequest, Executor};
pub use install::{ArchiveInstaller, SwapStrategy};
pub use pipeline::{Outcome, Pipeline, Stage};
pub use regen::DesiredArgs;
pub use resolver::{CandidateSource, DetectionFailure, PlatformConstraint, Resolution};
pub use runner::{CommandRunner, Invocation, ProcessOutput, SystemRunner};
pub use sdk::Sdk;

//! # Migration Module
//!
//! Motore di migrazione suddiviso in sottomoduli:
//! - `engine`: Orchestratore (scansione, pool di thread, riepilogo)
//! - `worker`: Elaborazione del singolo file, condivisa con il retry
//! - `queue`: Coda bloccante con flag di chiusura
//! - `counters`: Contatori atomici della run
//! - `path_resolver`: Calcolo dei path di destinazione

pub mod counters;
pub mod engine;
pub mod path_resolver;
pub mod queue;
pub mod worker;

pub use counters::{FileOutcome, MigrationCounters};
pub use engine::MigrationEngine;
pub use path_resolver::PathResolver;
pub use queue::WorkQueue;
pub use worker::{MigrationWorker, ProcessMode, TranscoderSet};

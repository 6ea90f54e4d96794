// src/lib.rs

pub mod backfill;
pub mod io;
pub mod matching;
pub mod models;
pub mod utils;

pub use matching::resolver::{resolve_company, resolve_partner, DEFAULT_SIMILARITY_THRESHOLD};
pub use models::ResolutionOutcome;

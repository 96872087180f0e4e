//! Domain models - poses, sequences, occupancy reports
//!
//! This module contains the canonical data types used throughout the system:
//! - `types` - joint poses, motion sequences, occupancy reports, routing keys
//! - `library` - the pose library (drills for Mode A, reactions for Mode B)

pub mod library;
pub mod types;

pub use library::PoseLibrary;

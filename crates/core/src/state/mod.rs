//! # Declarative Tables
//!
//! Read-only inputs loaded once at process start and shared by every session
//! without locking.

pub mod io;
pub mod obligations;
pub mod questions;

pub use obligations::{Facet, ObligationRule, Predicate, RuleTable};
pub use questions::{QuestionTable, Section, SubQuestion};

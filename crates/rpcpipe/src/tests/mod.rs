//! Crate-level tests driving connections through scripted handles.

mod support;

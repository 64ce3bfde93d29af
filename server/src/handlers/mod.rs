//! Request handlers for the document service.

mod documents;

pub use documents::*;

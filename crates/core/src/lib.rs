#![forbid(unsafe_code)]

//! Domain model for the course session core.
//!
//! Pure data: identifiers, the module/lesson tree, lesson content as
//! delivered by the backend, and the chat/selection value types. No I/O
//! lives here.

pub mod error;
pub mod model;

pub use error::LessonError;

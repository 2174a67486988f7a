//! Annotation service: in-memory store, loopback HTTP surface for the
//! overlay, and the send rendezvous that hands a user click to a waiting
//! tool call.

pub mod send;
pub mod service;
pub mod types;

pub use service::AnnotationService;
pub use types::{Annotation, Rect};

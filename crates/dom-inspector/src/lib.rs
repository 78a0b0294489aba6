//! DOM inspection over pooled protocol sessions.
//!
//! Thin, stateless facade over the DOM/CSS protocol domains: document
//! trees, selector queries, computed styles, bounding boxes and the
//! visibility/ancestor-path derivations built on top of them.

pub mod inspector;
pub mod model;
pub mod search;

pub use inspector::DomInspector;
pub use model::{BoundingBox, ElementNode, SearchFilter};
pub use search::{ancestor_path, search_elements, selector_hop};

//! Polygon stream decoding.

pub mod polygon;

pub use polygon::{Polygon, PolygonDecoder, PolygonHeader, Vertex, HEADER_WORDS, VERTEX_WORDS};

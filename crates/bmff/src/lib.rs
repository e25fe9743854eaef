//! Minimal ISOBMFF (MP4) helpers for live-fragment fix-up.
//!
//! Live media fragments occasionally carry a top-level `sidx` (segment
//! index) box that corrupts naive concatenation into a single file. This
//! crate provides the small amount of box parsing needed to find and
//! excise it from the head of a fragment.

mod box_scan;
mod sidx;

pub use box_scan::{BoxSpan, top_level_boxes};
pub use sidx::strip_sidx;

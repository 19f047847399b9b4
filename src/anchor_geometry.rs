/*
 * Pure placement calculation for an overlay attached to an anchor element.
 * The overlay sits directly below the anchor, pulled up by the anchor's
 * declared bottom inset, and is aligned horizontally against the anchor's
 * edges. The result is not clipped against the host; occlusion is left to
 * the renderer.
 *
 * Inputs are expected to be finite and non-negative. NaN or negative sizes
 * are not guarded and produce whatever the arithmetic yields.
 */
use crate::types::{HorizontalAlignment, Rect, Size};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlacementPolicy {
    /// Bottom margin the anchor declares; the overlay overlaps it.
    pub bottom_inset: f64,
    pub alignment: HorizontalAlignment,
}

impl PlacementPolicy {
    pub fn new(bottom_inset: f64, alignment: HorizontalAlignment) -> Self {
        Self {
            bottom_inset,
            alignment,
        }
    }

    pub fn place(&self, anchor_bounds: Rect, _host_bounds: Rect, desired_size: Size) -> Rect {
        let x = match self.alignment {
            HorizontalAlignment::Left => anchor_bounds.x,
            HorizontalAlignment::Right => anchor_bounds.right() - desired_size.width,
            HorizontalAlignment::Center | HorizontalAlignment::Stretch => {
                anchor_bounds.x + (anchor_bounds.width - desired_size.width) / 2.0
            }
        };
        let y = anchor_bounds.y + anchor_bounds.height - self.bottom_inset;

        Rect::new(x, y, desired_size.width, desired_size.height)
    }
}

/// Default placement: left-aligned directly below the anchor, no inset.
pub fn compute_placement(anchor_bounds: Rect, host_bounds: Rect, desired_size: Size) -> Rect {
    PlacementPolicy::default().place(anchor_bounds, host_bounds, desired_size)
}

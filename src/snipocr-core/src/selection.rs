//! Pointer-driven rectangle selection

use serde::{Deserialize, Serialize};
use snipocr_imaging::{DeviceRect, DisplayRect};
use tracing::{debug, warn};

/// Display surface the user drags over
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Surface {
    /// Width in display pixels
    pub width: f64,
    /// Height in display pixels
    pub height: f64,
    /// Device pixel ratio
    pub dpr: f64,
}

impl Surface {
    pub fn new(width: f64, height: f64, dpr: f64) -> Self {
        let dpr = if dpr.is_finite() && dpr > 0.0 {
            dpr
        } else {
            warn!("invalid device pixel ratio {}, using 1.0", dpr);
            1.0
        };
        Self { width, height, dpr }
    }

    fn contains(&self, x: f64, y: f64) -> bool {
        (0.0..=self.width).contains(&x) && (0.0..=self.height).contains(&y)
    }

    fn clamp(&self, x: f64, y: f64) -> (f64, f64) {
        (x.clamp(0.0, self.width.max(0.0)), y.clamp(0.0, self.height.max(0.0)))
    }
}

/// A finalized selection in both coordinate spaces
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Selection {
    pub display: DisplayRect,
    pub device: DeviceRect,
    pub dpr: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SelectionPhase {
    Idle,
    Dragging { start: (f64, f64), rect: DisplayRect },
    Finalized(Selection),
}

/// Outcome of releasing the pointer
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Release {
    /// No drag was in progress
    Ignored,
    /// The rectangle was below the minimum size and was dropped
    Degenerate,
    Finalized(Selection),
}

pub struct SelectionController {
    surface: Surface,
    phase: SelectionPhase,
}

impl SelectionController {
    pub fn new(surface: Surface) -> Self {
        Self {
            surface,
            phase: SelectionPhase::Idle,
        }
    }

    pub fn surface(&self) -> Surface {
        self.surface
    }

    /// Replace the surface; any selection in progress or finalized is dropped
    pub fn set_surface(&mut self, surface: Surface) {
        self.surface = surface;
        self.phase = SelectionPhase::Idle;
    }

    pub fn phase(&self) -> SelectionPhase {
        self.phase
    }

    pub fn selection(&self) -> Option<Selection> {
        match self.phase {
            SelectionPhase::Finalized(selection) => Some(selection),
            _ => None,
        }
    }

    pub fn is_dragging(&self) -> bool {
        matches!(self.phase, SelectionPhase::Dragging { .. })
    }

    /// Start a drag. Returns false when the point lies outside the surface.
    pub fn pointer_down(&mut self, x: f64, y: f64) -> bool {
        if !self.surface.contains(x, y) {
            debug!("pointer down at ({}, {}) outside surface, ignored", x, y);
            return false;
        }
        self.phase = SelectionPhase::Dragging {
            start: (x, y),
            rect: DisplayRect::from_corners((x, y), (x, y)),
        };
        true
    }

    /// Update the rectangle while dragging; returns the current rectangle
    pub fn pointer_move(&mut self, x: f64, y: f64) -> Option<DisplayRect> {
        match &mut self.phase {
            SelectionPhase::Dragging { start, rect } => {
                let current = self.surface.clamp(x, y);
                *rect = DisplayRect::from_corners(*start, current);
                Some(*rect)
            }
            _ => None,
        }
    }

    /// Finish the drag, finalizing or discarding the rectangle
    pub fn pointer_up(&mut self, x: f64, y: f64) -> Release {
        let Some(rect) = self.pointer_move(x, y) else {
            return Release::Ignored;
        };

        if rect.is_degenerate() {
            debug!("selection {}x{} below minimum size, discarded", rect.w, rect.h);
            self.phase = SelectionPhase::Idle;
            return Release::Degenerate;
        }

        let selection = Selection {
            display: rect,
            device: rect.to_device(self.surface.dpr),
            dpr: self.surface.dpr,
        };
        debug!("selection finalized: {}", selection.device);
        self.phase = SelectionPhase::Finalized(selection);
        Release::Finalized(selection)
    }

    /// Escape: drop any in-progress or finalized rectangle
    pub fn cancel(&mut self) {
        self.phase = SelectionPhase::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(dpr: f64) -> SelectionController {
        SelectionController::new(Surface::new(800.0, 600.0, dpr))
    }

    fn drag(c: &mut SelectionController, from: (f64, f64), to: (f64, f64)) -> Release {
        assert!(c.pointer_down(from.0, from.1));
        c.pointer_move((from.0 + to.0) / 2.0, (from.1 + to.1) / 2.0);
        c.pointer_up(to.0, to.1)
    }

    #[test]
    fn test_drag_direction_does_not_matter() {
        let mut a = controller(1.0);
        let mut b = controller(1.0);

        let forward = drag(&mut a, (100.0, 50.0), (300.0, 200.0));
        let backward = drag(&mut b, (300.0, 200.0), (100.0, 50.0));

        assert_eq!(forward, backward);
        let Release::Finalized(selection) = forward else {
            panic!("expected finalized selection");
        };
        assert_eq!(selection.display, DisplayRect { x: 100.0, y: 50.0, w: 200.0, h: 150.0 });
        assert_eq!(selection.device, DeviceRect::new(100, 50, 200, 150));
    }

    #[test]
    fn test_degenerate_selection_discarded() {
        let mut c = controller(2.0);
        assert_eq!(drag(&mut c, (10.0, 10.0), (11.5, 80.0)), Release::Degenerate);
        assert_eq!(c.phase(), SelectionPhase::Idle);
        assert!(c.selection().is_none());

        assert_eq!(drag(&mut c, (10.0, 10.0), (80.0, 10.0)), Release::Degenerate);
        assert!(c.selection().is_none());
    }

    #[test]
    fn test_device_conversion_uses_dpr() {
        let mut c = controller(1.25);
        let Release::Finalized(selection) = drag(&mut c, (10.2, 20.0), (50.0, 30.5)) else {
            panic!("expected finalized selection");
        };
        // x: 12.75 -> 13, y: 25, w: floor(49.75) = 49, h: floor(13.125) = 13
        assert_eq!(selection.device, DeviceRect::new(13, 25, 49, 13));
        assert_eq!(selection.dpr, 1.25);
    }

    #[test]
    fn test_pointer_down_outside_surface_ignored() {
        let mut c = controller(1.0);
        assert!(!c.pointer_down(900.0, 10.0));
        assert_eq!(c.pointer_up(950.0, 100.0), Release::Ignored);
    }

    #[test]
    fn test_drag_clamped_to_surface() {
        let mut c = controller(1.0);
        let Release::Finalized(selection) = drag(&mut c, (700.0, 500.0), (1000.0, 900.0)) else {
            panic!("expected finalized selection");
        };
        assert_eq!(selection.display, DisplayRect { x: 700.0, y: 500.0, w: 100.0, h: 100.0 });
    }

    #[test]
    fn test_escape_discards() {
        let mut c = controller(1.0);
        c.pointer_down(10.0, 10.0);
        c.pointer_move(100.0, 100.0);
        c.cancel();
        assert_eq!(c.pointer_up(100.0, 100.0), Release::Ignored);

        drag(&mut c, (10.0, 10.0), (100.0, 100.0));
        assert!(c.selection().is_some());
        c.cancel();
        assert!(c.selection().is_none());
    }

    #[test]
    fn test_new_drag_replaces_finalized() {
        let mut c = controller(1.0);
        drag(&mut c, (10.0, 10.0), (100.0, 100.0));
        assert!(c.pointer_down(200.0, 200.0));
        assert!(c.is_dragging());
        assert!(c.selection().is_none());
    }

    #[test]
    fn test_invalid_dpr_falls_back() {
        assert_eq!(Surface::new(10.0, 10.0, 0.0).dpr, 1.0);
        assert_eq!(Surface::new(10.0, 10.0, f64::NAN).dpr, 1.0);
    }
}

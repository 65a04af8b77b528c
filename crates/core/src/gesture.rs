//! Drag geometry and commit thresholds shared by deck drivers.
//!
//! Pure math only: the animation layer reads these values and
//! interpolates, it never makes decisions.

use serde::{Deserialize, Serialize};

/// Fraction of card width a drag must cross to commit.
pub const SWIPE_RATIO: f32 = 0.3;

/// Horizontal displacement below which no overlay badge is shown.
const OVERLAY_DEAD_ZONE: f32 = 20.0;

/// Divisor turning horizontal displacement into a card tilt, in degrees.
const ROTATION_DIVISOR: f32 = 18.0;

/// Live drag displacement relative to the pointer-down position.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct DragOffset {
    pub x: f32,
    pub y: f32,
}

impl DragOffset {
    pub const ZERO: DragOffset = DragOffset { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Direction {
    Left,
    Right,
}

/// Overlay badge variant ("LIKE" right, "NOPE" left).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayKind {
    Like,
    Nope,
}

impl OverlayKind {
    pub fn label(self) -> &'static str {
        match self {
            OverlayKind::Like => "LIKE",
            OverlayKind::Nope => "NOPE",
        }
    }
}

/// Overlay badge derived from a live drag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Overlay {
    pub kind: OverlayKind,
    /// 0..=1, full intensity at the commit threshold.
    pub opacity: f32,
}

pub fn commit_threshold(card_width: f32) -> f32 {
    card_width.max(1.0) * SWIPE_RATIO
}

/// Direction of a committed swipe, or None when the drag is released
/// short of the threshold.
pub fn past_threshold(offset: DragOffset, card_width: f32) -> Option<Direction> {
    if offset.x.abs() < commit_threshold(card_width) {
        return None;
    }
    Some(if offset.x > 0.0 { Direction::Right } else { Direction::Left })
}

pub fn overlay(offset: DragOffset, card_width: f32) -> Option<Overlay> {
    if offset.x.abs() <= OVERLAY_DEAD_ZONE {
        return None;
    }
    let opacity = (offset.x.abs() / commit_threshold(card_width)).min(1.0);
    let kind = if offset.x > 0.0 { OverlayKind::Like } else { OverlayKind::Nope };
    Some(Overlay { kind, opacity })
}

/// Card tilt for the render layer.
pub fn rotation_deg(offset: DragOffset) -> f32 {
    offset.x / ROTATION_DIVISOR
}

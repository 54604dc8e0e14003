//! Letterbox ("contain") layout for an image drawn inside a bounding box.
//!
//! The image keeps its aspect ratio and is centered on the minor axis, leaving equal
//! margins. `Letterbox` maps pointer positions inside the box to image pixels and
//! projects image-space geometry back into box-relative percentages for overlays.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// True when either side is zero, negative or not a finite number.
    pub fn is_degenerate(self) -> bool {
        !(self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0)
    }

    pub fn aspect(self) -> f64 {
        self.width / self.height
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Integer pixel coordinate in image space.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelPoint {
    pub x: u32,
    pub y: u32,
}

impl PixelPoint {
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned rectangle in image pixel space.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl PixelRect {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn contains(&self, px: f64, py: f64) -> bool {
        px >= self.x && px <= self.x + self.width && py >= self.y && py <= self.y + self.height
    }
}

/// Rectangle expressed in percent of the bounding box (0..=100 on each axis).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PercentRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PercentPoint {
    pub left: f64,
    pub top: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("point lies outside the displayed image")]
pub struct OutOfImage;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Letterbox {
    image: Size,
    bounds: Size,
    display: Size,
    offset: Point,
}

impl Letterbox {
    /// Fits an image of `image` pixels into `bounds`, preserving aspect ratio.
    ///
    /// Returns `None` when either size is degenerate (e.g. the image has not loaded yet
    /// or the element is collapsed).
    pub fn fit(image: Size, bounds: Size) -> Option<Self> {
        if image.is_degenerate() || bounds.is_degenerate() {
            return None;
        }

        let r_img = image.aspect();
        let r_box = bounds.aspect();
        let (display, offset) = if r_img > r_box {
            let height = bounds.width / r_img;
            (
                Size::new(bounds.width, height),
                Point::new(0.0, (bounds.height - height) / 2.0),
            )
        } else {
            let width = bounds.height * r_img;
            (
                Size::new(width, bounds.height),
                Point::new((bounds.width - width) / 2.0, 0.0),
            )
        };

        Some(Self {
            image,
            bounds,
            display,
            offset,
        })
    }

    pub fn image(&self) -> Size {
        self.image
    }

    pub fn bounds(&self) -> Size {
        self.bounds
    }

    pub fn display(&self) -> Size {
        self.display
    }

    pub fn offset(&self) -> Point {
        self.offset
    }

    /// Whether a box-local point lands on the displayed image (edges inclusive).
    pub fn contains(&self, local: Point) -> bool {
        let dx = local.x - self.offset.x;
        let dy = local.y - self.offset.y;
        dx >= 0.0 && dy >= 0.0 && dx <= self.display.width && dy <= self.display.height
    }

    /// Maps a box-local pointer position to image pixel coordinates.
    pub fn map_click(&self, local: Point) -> Result<PixelPoint, OutOfImage> {
        if !self.contains(local) {
            return Err(OutOfImage);
        }
        let x = ((local.x - self.offset.x) * self.image.width / self.display.width).round();
        let y = ((local.y - self.offset.y) * self.image.height / self.display.height).round();
        Ok(PixelPoint {
            x: x.clamp(0.0, self.image.width) as u32,
            y: y.clamp(0.0, self.image.height) as u32,
        })
    }

    /// Inverse of `map_click`: image pixel position to box-local position.
    pub fn to_local(&self, image_point: Point) -> Point {
        Point::new(
            image_point.x / self.image.width * self.display.width + self.offset.x,
            image_point.y / self.image.height * self.display.height + self.offset.y,
        )
    }

    pub fn project_point(&self, image_point: Point) -> PercentPoint {
        let local = self.to_local(image_point);
        PercentPoint {
            left: local.x / self.bounds.width * 100.0,
            top: local.y / self.bounds.height * 100.0,
        }
    }

    pub fn project_rect(&self, rect: PixelRect) -> PercentRect {
        let origin = self.project_point(Point::new(rect.x, rect.y));
        PercentRect {
            left: origin.left,
            top: origin.top,
            width: rect.width / self.image.width * self.display.width / self.bounds.width * 100.0,
            height: rect.height / self.image.height * self.display.height / self.bounds.height
                * 100.0,
        }
    }
}

/// Pure pointer mapping for an image of `(image_width, image_height)` drawn in a box of
/// `(box_width, box_height)`, clicked at box-local `(cx, cy)`.
pub fn map_pointer(
    image_width: f64,
    image_height: f64,
    box_width: f64,
    box_height: f64,
    cx: f64,
    cy: f64,
) -> Result<PixelPoint, OutOfImage> {
    Letterbox::fit(
        Size::new(image_width, image_height),
        Size::new(box_width, box_height),
    )
    .ok_or(OutOfImage)?
    .map_click(Point::new(cx, cy))
}

use crate::throttler::Viewport;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    fn is_drawable(self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }
}

impl From<Viewport> for Size {
    fn from(viewport: Viewport) -> Self {
        Self::new(f64::from(viewport.width), f64::from(viewport.height))
    }
}

/// Where the remote image sits inside the display surface.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Letterbox {
    pub offset: Point,
    pub image: Size,
}

/// Fits a `viewport`-shaped image inside `display`, centred on the padded axis.
pub fn letterbox(display: Size, viewport: Size) -> Option<Letterbox> {
    if !display.is_drawable() || !viewport.is_drawable() {
        return None;
    }
    // Aspect comparison by cross-multiplication keeps exact ratios exact.
    let image = if display.width * viewport.height > viewport.width * display.height {
        Size::new(display.height * viewport.width / viewport.height, display.height)
    } else {
        Size::new(display.width, display.width * viewport.height / viewport.width)
    };
    Some(Letterbox {
        offset: Point::new(
            (display.width - image.width) / 2.0,
            (display.height - image.height) / 2.0,
        ),
        image,
    })
}

/// Maps a display-space pointer into remote viewport space, clamped to the
/// viewport. Pure: identical inputs always give identical output.
pub fn map_pointer(pointer: Point, display: Size, viewport: Size) -> Option<Point> {
    let geometry = letterbox(display, viewport)?;
    let x = (pointer.x - geometry.offset.x) * viewport.width / geometry.image.width;
    let y = (pointer.y - geometry.offset.y) * viewport.height / geometry.image.height;
    if !x.is_finite() || !y.is_finite() {
        return None;
    }
    Some(Point::new(
        x.clamp(0.0, viewport.width),
        y.clamp(0.0, viewport.height),
    ))
}

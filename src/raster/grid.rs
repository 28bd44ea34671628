use crate::projection::{Crs, Region};
use serde::{Deserialize, Serialize};

/// North-up affine pixel to world transform.
///
/// `pixel_height` is positive; rows grow southwards.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_width: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn new(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            origin_x,
            origin_y,
            pixel_width,
            pixel_height,
        }
    }

    pub fn pixel_to_world(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.origin_x + col * self.pixel_width,
            self.origin_y - row * self.pixel_height,
        )
    }

    pub fn world_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.origin_x) / self.pixel_width,
            (self.origin_y - y) / self.pixel_height,
        )
    }

    pub fn pixel_center(&self, col: u32, row: u32) -> (f64, f64) {
        self.pixel_to_world(col as f64 + 0.5, row as f64 + 0.5)
    }
}

/// Rectangular block of pixels within a grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelWindow {
    pub col_off: u32,
    pub row_off: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelWindow {
    pub fn new(col_off: u32, row_off: u32, width: u32, height: u32) -> Self {
        Self {
            col_off,
            row_off,
            width,
            height,
        }
    }

    pub fn col_end(&self) -> u32 {
        self.col_off + self.width
    }

    pub fn row_end(&self) -> u32 {
        self.row_off + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PixelGrid {
    pub crs: Crs,
    pub transform: GeoTransform,
    pub width: u32,
    pub height: u32,
}

impl PixelGrid {
    pub fn new(crs: Crs, transform: GeoTransform, width: u32, height: u32) -> Self {
        Self {
            crs,
            transform,
            width,
            height,
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn bounds(&self) -> Region<f64> {
        let (left, top) = self.transform.pixel_to_world(0.0, 0.0);
        let (right, bottom) = self
            .transform
            .pixel_to_world(self.width as f64, self.height as f64);
        Region::new(left, bottom, right, top)
    }

    /// Grid of a sub-window sharing this grid's pixel size.
    pub fn window_grid(&self, window: &PixelWindow) -> Self {
        let (x, y) = self
            .transform
            .pixel_to_world(window.col_off as f64, window.row_off as f64);
        Self {
            crs: self.crs,
            transform: GeoTransform::new(x, y, self.transform.pixel_width, self.transform.pixel_height),
            width: window.width,
            height: window.height,
        }
    }

    /// Pixels covering `region` (grid CRS), grown by `margin` pixels and
    /// clipped to the grid. None when nothing overlaps.
    pub fn window_covering(&self, region: &Region<f64>, margin: u32) -> Option<PixelWindow> {
        let (c0, r0) = self.transform.world_to_pixel(region.x_min(), region.y_max());
        let (c1, r1) = self.transform.world_to_pixel(region.x_max(), region.y_min());
        let margin = margin as f64;
        let col_min = (c0.floor() - margin).max(0.0);
        let row_min = (r0.floor() - margin).max(0.0);
        let col_max = (c1.ceil() + margin).min(self.width as f64);
        let row_max = (r1.ceil() + margin).min(self.height as f64);
        if !(col_max > col_min && row_max > row_min) {
            return None;
        }
        Some(PixelWindow::new(
            col_min as u32,
            row_min as u32,
            (col_max - col_min) as u32,
            (row_max - row_min) as u32,
        ))
    }

    /// Grid of the next overview level, dimensions halved and rounded up.
    pub fn overview(&self) -> Self {
        Self {
            crs: self.crs,
            transform: GeoTransform::new(
                self.transform.origin_x,
                self.transform.origin_y,
                self.transform.pixel_width * 2.0,
                self.transform.pixel_height * 2.0,
            ),
            width: self.width.div_ceil(2),
            height: self.height.div_ceil(2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> PixelGrid {
        PixelGrid::new(
            Crs::from_epsg(5070),
            GeoTransform::new(1000.0, 2000.0, 10.0, 10.0),
            100,
            50,
        )
    }

    #[test]
    fn bounds_and_centers() {
        let g = grid();
        assert_eq!(g.bounds().as_tuple(), (1000.0, 1500.0, 2000.0, 2000.0));
        assert_eq!(g.transform.pixel_center(0, 0), (1005.0, 1995.0));
        assert_eq!(g.transform.world_to_pixel(1005.0, 1995.0), (0.5, 0.5));
    }

    #[test]
    fn covering_window_is_clipped() {
        let g = grid();
        let w = g
            .window_covering(&Region::new(950.0, 1900.0, 1025.0, 2100.0), 1)
            .unwrap();
        assert_eq!(w, PixelWindow::new(0, 0, 4, 11));
        assert!(g
            .window_covering(&Region::new(0.0, 0.0, 500.0, 500.0), 0)
            .is_none());
        let sub = g.window_grid(&PixelWindow::new(10, 5, 3, 2));
        assert_eq!(sub.bounds().as_tuple(), (1100.0, 1930.0, 1130.0, 1950.0));
    }

    #[test]
    fn overview_halves_rounding_up() {
        let o = grid().overview().overview();
        assert_eq!((o.width, o.height), (25, 13));
        assert_eq!(o.transform.pixel_width, 40.0);
    }
}

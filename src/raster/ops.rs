use super::{PixelWindow, Raster, RasterError, Samples};
use serde::{Deserialize, Serialize};

/// Filter used when building overview levels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizeFilter {
    #[default]
    Nearest,
    Average,
}

impl Raster {
    /// Half resolution copy, each output pixel drawn from a 2x2 block.
    ///
    /// `Nearest` takes the block's top-left pixel. `Average` is the mean of
    /// the block's valid pixels, nodata when there are none.
    pub fn overview(&self, filter: ResizeFilter) -> Raster {
        let grid = self.grid.overview();
        let mut out = Raster {
            grid,
            nodata: self.nodata,
            samples: Samples::filled(self.data_type(), grid.pixel_count(), self.nodata),
        };
        for row in 0..grid.height {
            for col in 0..grid.width {
                let (c, r) = (col * 2, row * 2);
                let value = match filter {
                    ResizeFilter::Nearest => self.valid(c, r),
                    ResizeFilter::Average => {
                        let block = [(c, r), (c + 1, r), (c, r + 1), (c + 1, r + 1)];
                        let (sum, n) = block
                            .iter()
                            .filter_map(|(c, r)| self.valid(*c, *r))
                            .fold((0.0, 0), |(sum, n), v| (sum + v, n + 1));
                        (n > 0).then(|| sum / n as f64)
                    }
                };
                if let Some(v) = value {
                    out.set(col, row, v);
                }
            }
        }
        out
    }

    /// Copy of the pixels in `window`.
    pub fn extract(&self, window: &PixelWindow) -> Result<Raster, RasterError> {
        if window.col_end() > self.width() || window.row_end() > self.height() {
            return Err(RasterError::WindowOutOfBounds(*window));
        }
        let grid = self.grid.window_grid(window);
        let mut samples = Samples::filled(self.data_type(), grid.pixel_count(), self.nodata);
        for row in 0..window.height {
            for col in 0..window.width {
                let src = self.index(window.col_off + col, window.row_off + row);
                samples.set((row * window.width + col) as usize, self.samples.get(src));
            }
        }
        Raster::new(grid, self.nodata, samples)
    }

    /// Write `src` pixels at (col_off, row_off), dropping what falls outside.
    pub fn paste(&mut self, src: &Raster, col_off: u32, row_off: u32) {
        let cols = src.width().min(self.width().saturating_sub(col_off));
        let rows = src.height().min(self.height().saturating_sub(row_off));
        for row in 0..rows {
            for col in 0..cols {
                let value = src.samples.get(src.index(col, row));
                self.set(col_off + col, row_off + row, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::Crs;
    use crate::raster::{DataType, GeoTransform, PixelGrid};

    fn raster(values: Vec<f32>, width: u32) -> Raster {
        let height = values.len() as u32 / width;
        let grid = PixelGrid::new(
            Crs::from_epsg(5070),
            GeoTransform::new(0.0, 0.0, 1.0, 1.0),
            width,
            height,
        );
        Raster::new(grid, -1.0, Samples::F32(values)).unwrap()
    }

    #[test]
    fn average_overview_ignores_nodata() {
        let r = raster(vec![1.0, 3.0, -1.0, -1.0, 5.0, -1.0, -1.0, -1.0, 8.0], 3);
        let o = r.overview(ResizeFilter::Average);
        assert_eq!((o.width(), o.height()), (2, 2));
        assert_eq!(o.samples, Samples::F32(vec![3.0, -1.0, -1.0, 8.0]));
    }

    #[test]
    fn nearest_overview_keeps_categories() {
        let r = raster(vec![7.0, 9.0, 9.0, 9.0], 2);
        let o = r.overview(ResizeFilter::Nearest);
        assert_eq!(o.samples, Samples::F32(vec![7.0]));
        assert_eq!(o.data_type(), DataType::F32);
    }

    #[test]
    fn extract_and_paste() {
        let r = raster((0..12).map(|v| v as f32).collect(), 4);
        let w = r.extract(&PixelWindow::new(1, 1, 2, 2)).unwrap();
        assert_eq!(w.samples, Samples::F32(vec![5.0, 6.0, 9.0, 10.0]));
        assert!(r.extract(&PixelWindow::new(3, 0, 2, 1)).is_err());

        let mut canvas = raster(vec![-1.0; 9], 3);
        canvas.paste(&w, 2, 2);
        assert_eq!(canvas.get(2, 2), Some(5.0));
        assert_eq!(canvas.valid_count(), 1);
    }
}

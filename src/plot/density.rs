/// Mean color value per raster cell.
///
/// Cells are indexed `ix + iy * nx`, with `ix` growing along `x_range` and
/// `iy` along `y_range`. Points outside the ranges or with a NaN coordinate
/// or color are skipped.
#[derive(Debug, Clone)]
pub struct DensityGrid {
    pub nx: usize,
    pub ny: usize,
    pub x_range: (f64, f64),
    pub y_range: (f64, f64),
    sum: Vec<f64>,
    count: Vec<u32>,
}

impl DensityGrid {
    pub fn build(
        x: &[f64],
        y: &[f64],
        c: &[f64],
        x_range: (f64, f64),
        y_range: (f64, f64),
        nx: usize,
        ny: usize,
    ) -> Self {
        let nx = nx.max(1);
        let ny = ny.max(1);
        let mut grid = DensityGrid {
            nx,
            ny,
            x_range,
            y_range,
            sum: vec![0.0; nx * ny],
            count: vec![0; nx * ny],
        };
        for ((&xi, &yi), &ci) in x.iter().zip(y).zip(c) {
            if ci.is_nan() {
                continue;
            }
            let (Some(ix), Some(iy)) = (bin(xi, x_range, nx), bin(yi, y_range, ny)) else {
                continue;
            };
            grid.sum[ix + iy * nx] += ci;
            grid.count[ix + iy * nx] += 1;
        }
        grid
    }

    pub fn count(&self, ix: usize, iy: usize) -> u32 {
        self.count[ix + iy * self.nx]
    }

    pub fn mean(&self, ix: usize, iy: usize) -> Option<f64> {
        let n = self.count(ix, iy);
        (n > 0).then(|| self.sum[ix + iy * self.nx] / n as f64)
    }

    /// Data-space bounds `((x0, y0), (x1, y1))` of a cell.
    pub fn cell_bounds(&self, ix: usize, iy: usize) -> ((f64, f64), (f64, f64)) {
        let dx = (self.x_range.1 - self.x_range.0) / self.nx as f64;
        let dy = (self.y_range.1 - self.y_range.0) / self.ny as f64;
        let x0 = self.x_range.0 + ix as f64 * dx;
        let y0 = self.y_range.0 + iy as f64 * dy;
        ((x0, y0), (x0 + dx, y0 + dy))
    }

    /// Occupied cells as `(ix, iy, mean)`.
    pub fn occupied(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        (0..self.ny).flat_map(move |iy| {
            (0..self.nx).filter_map(move |ix| self.mean(ix, iy).map(|m| (ix, iy, m)))
        })
    }
}

fn bin(v: f64, range: (f64, f64), n: usize) -> Option<usize> {
    let (lo, hi) = range;
    if !(v >= lo && v <= hi) || hi <= lo {
        return None;
    }
    let idx = ((v - lo) / (hi - lo) * n as f64) as usize;
    Some(idx.min(n - 1))
}

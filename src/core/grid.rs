//! Focus rectangle to patch grid mapping
//!
//! A vision transformer splits its processed input into `patch_size` square
//! cells and emits one embedding per cell, in row-major order. A rectangle
//! drawn by a user lives in the coordinate space of whatever surface it was
//! drawn on, so it is first rescaled (each axis independently) into the
//! processed image shape and then converted into the set of cells it covers.

use serde::{Deserialize, Serialize};

/// Height and width of an image surface in pixels
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageShape {
    pub height: usize,
    pub width: usize,
}

impl ImageShape {
    pub fn new(height: usize, width: usize) -> Self {
        Self { height, width }
    }
}

/// Number of patch rows and columns of a processed image
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridShape {
    pub rows: usize,
    pub cols: usize,
}

impl GridShape {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }

    /// Grid induced by an image shape: `floor(h / patch_size) x floor(w / patch_size)`.
    pub fn from_image(shape: ImageShape, patch_size: usize) -> Self {
        if patch_size == 0 {
            return Self::new(0, 0);
        }
        Self::new(shape.height / patch_size, shape.width / patch_size)
    }

    /// Total number of cells
    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    /// Cell count, or `None` if it does not fit in `usize`.
    pub fn checked_len(&self) -> Option<usize> {
        self.rows.checked_mul(self.cols)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One patch grid cell
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridCell {
    pub row: usize,
    pub col: usize,
}

impl GridCell {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }

    /// Position of this cell in a row-major patch matrix.
    pub fn flat_index(&self, grid: GridShape) -> usize {
        self.row * grid.cols + self.col
    }
}

/// Axis-aligned rectangle `(x1, y1)`-`(x2, y2)` in pixel coordinates
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FocusRect {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl FocusRect {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Rescale from `source` to `target` coordinates, scaling x and y independently.
    pub fn rescale(&self, source: ImageShape, target: ImageShape) -> Self {
        let width_ratio = target.width as f64 / source.width as f64;
        let height_ratio = target.height as f64 / source.height as f64;
        Self {
            x1: self.x1 * width_ratio,
            y1: self.y1 * height_ratio,
            x2: self.x2 * width_ratio,
            y2: self.y2 * height_ratio,
        }
    }
}

/// Maps focus rectangles onto the patch grid of a processed image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GridCoordinateMapper {
    patch_size: usize,
}

impl GridCoordinateMapper {
    pub fn new(patch_size: usize) -> Self {
        Self { patch_size }
    }

    pub fn patch_size(&self) -> usize {
        self.patch_size
    }

    /// Rescale `rect` from `source` into `target` and return the covered cells.
    ///
    /// Cells are returned in row-major order without duplicates. A rectangle
    /// that lies entirely outside the grid yields an empty vector.
    pub fn map(&self, rect: &FocusRect, source: ImageShape, target: ImageShape) -> Vec<GridCell> {
        if source.height == 0 || source.width == 0 {
            return Vec::new();
        }
        let scaled = rect.rescale(source, target);
        self.cells_in(&scaled, GridShape::from_image(target, self.patch_size))
    }

    /// Cells covered by a rectangle already expressed in processed-image pixels.
    ///
    /// `x2`/`y2` are exclusive edges, so a rectangle ending exactly on a patch
    /// boundary does not spill into the next cell. Zero-area rectangles still
    /// cover the cell they sit in.
    pub fn cells_in(&self, rect: &FocusRect, grid: GridShape) -> Vec<GridCell> {
        if self.patch_size == 0 {
            return Vec::new();
        }
        let patch = self.patch_size as f64;
        let Some((row_start, row_end)) = axis_range(rect.y1, rect.y2, patch, grid.rows) else {
            return Vec::new();
        };
        let Some((col_start, col_end)) = axis_range(rect.x1, rect.x2, patch, grid.cols) else {
            return Vec::new();
        };

        let mut cells = Vec::with_capacity((row_end - row_start + 1) * (col_end - col_start + 1));
        for row in row_start..=row_end {
            for col in col_start..=col_end {
                cells.push(GridCell::new(row, col));
            }
        }
        cells
    }
}

/// Inclusive cell range along one axis, clamped to `[0, cells - 1]`.
fn axis_range(lo: f64, hi: f64, patch: f64, cells: usize) -> Option<(usize, usize)> {
    if cells == 0 {
        return None;
    }
    let first = (lo / patch).floor();
    let last = ((hi / patch).ceil() - 1.0).max(first);
    let max = (cells - 1) as f64;

    if last < 0.0 || first > max {
        return None;
    }
    Some((first.max(0.0) as usize, last.min(max) as usize))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SQUARE: ImageShape = ImageShape {
        height: 448,
        width: 448,
    };

    #[test]
    fn test_grid_from_image_floors() {
        assert_eq!(
            GridShape::from_image(ImageShape::new(448, 448), 14),
            GridShape::new(32, 32)
        );
        assert_eq!(
            GridShape::from_image(ImageShape::new(450, 600), 14),
            GridShape::new(32, 42)
        );
        assert!(GridShape::from_image(SQUARE, 0).is_empty());
        assert_eq!(GridShape::new(32, 32).checked_len(), Some(1024));
        assert_eq!(GridShape::new(usize::MAX, 2).checked_len(), None);
    }

    #[test]
    fn test_first_patch_maps_to_origin_cell() {
        let mapper = GridCoordinateMapper::new(14);
        let cells = mapper.map(&FocusRect::new(0.0, 0.0, 14.0, 14.0), SQUARE, SQUARE);
        assert_eq!(cells, vec![GridCell::new(0, 0)]);
    }

    #[test]
    fn test_rescale_doubles_coordinates() {
        let rect = FocusRect::new(3.0, 7.5, 41.0, 99.0);
        let scaled = rect.rescale(ImageShape::new(100, 100), ImageShape::new(200, 200));
        assert_eq!(scaled, FocusRect::new(6.0, 15.0, 82.0, 198.0));
    }

    #[test]
    fn test_rescale_is_per_axis() {
        let rect = FocusRect::new(10.0, 10.0, 20.0, 20.0);
        let scaled = rect.rescale(ImageShape::new(100, 50), ImageShape::new(200, 200));
        assert_eq!(scaled, FocusRect::new(40.0, 20.0, 80.0, 40.0));
    }

    #[test]
    fn test_cells_are_row_major() {
        let mapper = GridCoordinateMapper::new(14);
        let cells = mapper.map(&FocusRect::new(14.0, 0.0, 42.0, 28.0), SQUARE, SQUARE);
        assert_eq!(
            cells,
            vec![
                GridCell::new(0, 1),
                GridCell::new(0, 2),
                GridCell::new(1, 1),
                GridCell::new(1, 2),
            ]
        );
    }

    #[test]
    fn test_degenerate_rect_covers_one_cell() {
        let mapper = GridCoordinateMapper::new(14);
        let point = mapper.map(&FocusRect::new(20.0, 30.0, 20.0, 30.0), SQUARE, SQUARE);
        assert_eq!(point, vec![GridCell::new(2, 1)]);

        let on_boundary = mapper.map(&FocusRect::new(28.0, 28.0, 28.0, 28.0), SQUARE, SQUARE);
        assert_eq!(on_boundary, vec![GridCell::new(2, 2)]);
    }

    #[test]
    fn test_rect_outside_grid_is_empty() {
        let mapper = GridCoordinateMapper::new(14);
        assert!(mapper
            .map(&FocusRect::new(500.0, 500.0, 600.0, 600.0), SQUARE, SQUARE)
            .is_empty());
        assert!(mapper
            .map(&FocusRect::new(-60.0, 0.0, -10.0, 100.0), SQUARE, SQUARE)
            .is_empty());
        assert!(mapper
            .map(&FocusRect::new(448.0, 0.0, 460.0, 14.0), SQUARE, SQUARE)
            .is_empty());
    }

    #[test]
    fn test_partially_outside_rect_is_clamped() {
        let mapper = GridCoordinateMapper::new(14);
        let cells = mapper.map(&FocusRect::new(-20.0, 430.0, 10.0, 1000.0), SQUARE, SQUARE);
        assert_eq!(cells, vec![GridCell::new(30, 0), GridCell::new(31, 0)]);
    }

    #[test]
    fn test_full_surface_covers_every_cell() {
        let mapper = GridCoordinateMapper::new(14);
        let surface = ImageShape::new(600, 800);
        let target = ImageShape::new(448, 588);
        let cells = mapper.map(&FocusRect::new(0.0, 0.0, 800.0, 600.0), surface, target);
        let grid = GridShape::from_image(target, 14);
        assert_eq!(cells.len(), grid.len());
        assert_eq!(cells.last().unwrap().flat_index(grid), grid.len() - 1);
    }

    #[test]
    fn test_flat_index_row_major() {
        let grid = GridShape::new(4, 5);
        assert_eq!(GridCell::new(0, 0).flat_index(grid), 0);
        assert_eq!(GridCell::new(1, 0).flat_index(grid), 5);
        assert_eq!(GridCell::new(3, 4).flat_index(grid), 19);
    }
}

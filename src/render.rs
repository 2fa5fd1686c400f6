//! Drawing sinks: comparative histograms, landscape surface and filled
//! contours. Every figure goes through [`with_figure`], which flushes the
//! drawing area on every exit path and then drops it.

use plotters::coord::cartesian::Cartesian2d;
use plotters::coord::types::RangedCoordf64;
use plotters::coord::Shift;
use plotters::drawing::DrawingAreaErrorKind;
use plotters::prelude::*;
use serde_json::json;
use std::error::Error;
use std::fs::create_dir_all;
use std::path::Path;
use std::sync::Arc;

use crate::error::{HarnessError, Result};
use crate::landscape::LandscapeGrid;
use crate::logging::{log, obj, v_str, Domain, Level, ProfileScope};
use crate::stats::{linspace, Histogram};

/// Cells drawn per axis at most; finer grids are sampled with a stride.
const MAX_DRAWN_CELLS: usize = 200;
const MAX_SURFACE_CELLS: usize = 80;

pub type DrawResult = std::result::Result<(), Box<dyn Error>>;

/// Acquire an SVG drawing area at `path`, run `draw`, then present it.
///
/// The area is presented even when `draw` fails; the first error wins.
pub fn with_figure<F>(path: &Path, size: (u32, u32), draw: F) -> Result<()>
where
    F: FnOnce(&DrawingArea<SVGBackend<'_>, Shift>) -> DrawResult,
{
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            create_dir_all(parent)?;
        }
    }
    let root = SVGBackend::new(path, size).into_drawing_area();
    let drawn = root
        .fill(&WHITE)
        .map_err(|e| Box::new(e) as Box<dyn Error>)
        .and_then(|_| draw(&root));
    let presented = root.present();
    drop(root);

    drawn.map_err(HarnessError::render)?;
    presented.map_err(HarnessError::render)?;
    log(
        Level::Info,
        Domain::System,
        "figure_written",
        obj(&[("path", v_str(&path.display().to_string()))]),
    );
    Ok(())
}

/// Diverging blue-white-red map for `t` in `[0, 1]`.
pub fn coolwarm(t: f64) -> RGBColor {
    const COOL: (f64, f64, f64) = (59.0, 76.0, 192.0);
    const MID: (f64, f64, f64) = (221.0, 221.0, 221.0);
    const WARM: (f64, f64, f64) = (180.0, 4.0, 38.0);
    let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.5 };
    let (a, b, s) = if t < 0.5 {
        (COOL, MID, t * 2.0)
    } else {
        (MID, WARM, (t - 0.5) * 2.0)
    };
    let lerp = |p: f64, q: f64| (p + (q - p) * s).round() as u8;
    RGBColor(lerp(a.0, b.0), lerp(a.1, b.1), lerp(a.2, b.2))
}

fn stride_for(resolution: usize, max_cells: usize) -> usize {
    ((resolution + max_cells - 1) / max_cells).max(1)
}

/// Sampled indices along an axis, always including the last one.
fn sampled_indices(resolution: usize, stride: usize) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..resolution).step_by(stride).collect();
    if idx.last() != Some(&(resolution - 1)) {
        idx.push(resolution - 1);
    }
    idx
}

/// Build a 2-D chart spanning the grid's square.
pub(crate) fn landscape_chart<'a, 'b>(
    root: &'a DrawingArea<SVGBackend<'b>, Shift>,
    grid: &LandscapeGrid,
    caption: &str,
) -> std::result::Result<
    ChartContext<'a, SVGBackend<'b>, Cartesian2d<RangedCoordf64, RangedCoordf64>>,
    Box<dyn Error>,
> {
    let mut chart = ChartBuilder::on(root)
        .caption(caption, ("sans-serif", 22))
        .margin(15)
        .x_label_area_size(40)
        .y_label_area_size(55)
        .build_cartesian_2d(grid.low()..grid.high(), grid.low()..grid.high())?;
    chart
        .configure_mesh()
        .disable_mesh()
        .x_desc("x1")
        .y_desc("x2")
        .draw()?;
    Ok(chart)
}

// =============================================================================
// Contours
// =============================================================================

/// Filled-contour layer over a grid: each cell is assigned one of
/// `level_count` equal-width value bands. Drawable onto any chart whose
/// coordinates match the grid.
#[derive(Debug, Clone)]
pub struct ContourLayer {
    grid: Arc<LandscapeGrid>,
    thresholds: Vec<f64>,
    bands: Vec<Vec<usize>>,
}

impl ContourLayer {
    pub fn grid(&self) -> &Arc<LandscapeGrid> {
        &self.grid
    }

    /// Band boundaries from the grid minimum to its maximum (`level_count + 1` values).
    pub fn thresholds(&self) -> &[f64] {
        &self.thresholds
    }

    pub fn level_count(&self) -> usize {
        self.thresholds.len() - 1
    }

    pub fn band_at(&self, i: usize, j: usize) -> Option<usize> {
        self.bands.get(i)?.get(j).copied()
    }

    fn band_color(&self, band: usize) -> RGBColor {
        let levels = self.level_count();
        if levels <= 1 {
            return coolwarm(0.5);
        }
        coolwarm(band as f64 / (levels - 1) as f64)
    }

    /// Sampled cells as (corners, band). The last row and column are always
    /// sampled so the painted area reaches both grid bounds.
    fn cells(&self) -> Vec<([(f64, f64); 2], usize)> {
        let grid = &self.grid;
        let axis = grid.axis();
        let stride = stride_for(grid.resolution(), MAX_DRAWN_CELLS);
        let half = (axis[1] - axis[0]) * stride as f64 / 2.0;
        let (lo, hi) = (grid.low(), grid.high());
        let idx = sampled_indices(grid.resolution(), stride);

        let mut cells = Vec::with_capacity(idx.len() * idx.len());
        for &i in &idx {
            for &j in &idx {
                let (cx, cy) = (axis[j], axis[i]);
                cells.push((
                    [
                        ((cx - half).max(lo), (cy - half).max(lo)),
                        ((cx + half).min(hi), (cy + half).min(hi)),
                    ],
                    self.bands[i][j],
                ));
            }
        }
        cells
    }

    /// Paint the bands onto `chart`.
    pub fn draw_on<DB: DrawingBackend>(
        &self,
        chart: &mut ChartContext<'_, DB, Cartesian2d<RangedCoordf64, RangedCoordf64>>,
    ) -> std::result::Result<(), DrawingAreaErrorKind<DB::ErrorType>> {
        let cells = self
            .cells()
            .into_iter()
            .map(|(corners, band)| Rectangle::new(corners, self.band_color(band).filled()));
        chart.draw_series(cells)?;
        Ok(())
    }

    /// Write the contour alone to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let _scope = ProfileScope::new("render_contour");
        with_figure(path, (900, 800), |root| {
            let mut chart = landscape_chart(root, &self.grid, "Schwefel landscape (contour)")?;
            self.draw_on(&mut chart)?;
            Ok(())
        })
    }
}

/// Classify every grid cell into `level_count` value bands.
pub fn render_contour(grid: &Arc<LandscapeGrid>, level_count: usize) -> Result<ContourLayer> {
    if level_count == 0 {
        return Err(HarnessError::InvalidGrid("contour needs at least one level".into()));
    }
    let (vmin, vmax) = grid
        .value_range()
        .ok_or_else(|| HarnessError::InvalidGrid("grid has no finite values".into()))?;
    let thresholds = linspace(vmin, vmax, level_count + 1);
    let inner = &thresholds[1..level_count];
    let bands = grid
        .values()
        .iter()
        .map(|row| {
            row.iter()
                .map(|&v| if v.is_nan() { 0 } else { inner.partition_point(|&t| t <= v) })
                .collect()
        })
        .collect();
    Ok(ContourLayer {
        grid: Arc::clone(grid),
        thresholds,
        bands,
    })
}

// =============================================================================
// Surface
// =============================================================================

/// 3-D surface of the grid, written to `path`.
pub fn render_surface(grid: &LandscapeGrid, path: &Path) -> Result<()> {
    let _scope = ProfileScope::with_context("render_surface", &[("resolution", json!(grid.resolution()))]);
    let (vmin, vmax) = grid
        .value_range()
        .ok_or_else(|| HarnessError::InvalidGrid("grid has no finite values".into()))?;
    let span = (vmax - vmin).max(f64::EPSILON);
    let axis = grid.axis();
    let values = grid.values();
    let idx = sampled_indices(grid.resolution(), stride_for(grid.resolution(), MAX_SURFACE_CELLS));

    with_figure(path, (1000, 850), |root| {
        let mut chart = ChartBuilder::on(root)
            .caption("Schwefel landscape f(x1, x2)", ("sans-serif", 24))
            .margin(20)
            .build_cartesian_3d(grid.low()..grid.high(), vmin..vmax, grid.low()..grid.high())?;
        chart.with_projection(|mut pb| {
            pb.pitch = 0.55;
            pb.yaw = 0.7;
            pb.scale = 0.85;
            pb.into_matrix()
        });
        chart.configure_axes().draw()?;

        let mut polys = Vec::with_capacity(idx.len() * idx.len());
        for w in idx.windows(2) {
            let (i0, i1) = (w[0], w[1]);
            for v in idx.windows(2) {
                let (j0, j1) = (v[0], v[1]);
                let corners = [values[i0][j0], values[i0][j1], values[i1][j1], values[i1][j0]];
                let mean = corners.iter().sum::<f64>() / 4.0;
                let color = coolwarm((mean - vmin) / span);
                polys.push(Polygon::new(
                    vec![
                        (axis[j0], corners[0], axis[i0]),
                        (axis[j1], corners[1], axis[i0]),
                        (axis[j1], corners[2], axis[i1]),
                        (axis[j0], corners[3], axis[i1]),
                    ],
                    color.filled(),
                ));
            }
        }
        chart.draw_series(polys)?;
        Ok(())
    })
}

// =============================================================================
// Histograms
// =============================================================================

/// One labelled histogram in a comparison figure.
#[derive(Debug, Clone, Copy)]
pub struct HistogramSeries<'a> {
    pub label: &'a str,
    pub histogram: &'a Histogram,
}

/// Overlay histograms that share bin edges, layered and listed in the given order.
pub fn render_histogram(series: &[HistogramSeries<'_>], repeats: usize, path: &Path) -> Result<()> {
    let edges = series
        .first()
        .map(|s| s.histogram.edges.clone())
        .filter(|e| e.len() >= 2)
        .ok_or_else(|| HarnessError::Render("no histogram bins to draw".into()))?;
    if series.iter().any(|s| s.histogram.edges != edges) {
        return Err(HarnessError::Render("histograms do not share bin edges".into()));
    }
    let y_max = series
        .iter()
        .map(|s| s.histogram.max_count())
        .max()
        .unwrap_or(0)
        .max(1) as f64;
    let (x_lo, x_hi) = (edges[0], edges[edges.len() - 1]);

    with_figure(path, (1200, 750), |root| {
        let mut chart = ChartBuilder::on(root)
            .caption("Distribution of optimisation results", ("sans-serif", 22))
            .margin(15)
            .x_label_area_size(45)
            .y_label_area_size(60)
            .build_cartesian_2d(x_lo..x_hi, 0.0..(y_max * 1.1))?;
        chart
            .configure_mesh()
            .x_desc("optimisation result")
            .y_desc(format!("number of instances out of {} repeats", repeats))
            .draw()?;

        for (i, s) in series.iter().enumerate() {
            let color = Palette99::pick(i).to_rgba().mix(0.5);
            let bars = s
                .histogram
                .counts
                .iter()
                .enumerate()
                .filter(|(_, &c)| c > 0)
                .map(|(k, &c)| Rectangle::new([(edges[k], 0.0), (edges[k + 1], c as f64)], color.filled()));
            chart
                .draw_series(bars)?
                .label(s.label)
                .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 12, y + 5)], color.filled()));
        }

        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landscape::build_grid;
    use tempfile::TempDir;

    #[test]
    fn test_coolwarm_endpoints() {
        assert_eq!(coolwarm(0.0), RGBColor(59, 76, 192));
        assert_eq!(coolwarm(0.5), RGBColor(221, 221, 221));
        assert_eq!(coolwarm(1.0), RGBColor(180, 4, 38));
        assert_eq!(coolwarm(f64::NAN), coolwarm(0.5));
        assert_eq!(coolwarm(7.0), coolwarm(1.0));
    }

    #[test]
    fn test_sampled_indices_keep_last() {
        assert_eq!(sampled_indices(10, 4), vec![0, 4, 8, 9]);
        assert_eq!(sampled_indices(9, 4), vec![0, 4, 8]);
        assert_eq!(stride_for(1000, 200), 5);
        assert_eq!(stride_for(50, 200), 1);
    }

    #[test]
    fn test_contour_bands_cover_levels() {
        let grid = build_grid(-500.0, 500.0, 60).unwrap();
        let layer = render_contour(&grid, 8).unwrap();
        assert_eq!(layer.level_count(), 8);
        assert_eq!(layer.thresholds().len(), 9);
        let mut seen = [false; 8];
        for i in 0..60 {
            for j in 0..60 {
                let b = layer.band_at(i, j).unwrap();
                assert!(b < 8);
                seen[b] = true;
            }
        }
        // extremes always populate the first and last band
        assert!(seen[0] && seen[7]);
        assert!(Arc::ptr_eq(layer.grid(), &grid));
        assert!(render_contour(&grid, 0).is_err());
    }

    #[test]
    fn test_strided_contour_reaches_both_bounds() {
        // 1000 points per axis is drawn with stride 5; 999 is not a multiple of it
        let grid = build_grid(-500.0, 500.0, 1000).unwrap();
        let layer = render_contour(&grid, 5).unwrap();
        let cells = layer.cells();
        assert_eq!(cells.len(), 201 * 201);

        let (mut x0, mut y0) = (f64::INFINITY, f64::INFINITY);
        let (mut x1, mut y1) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        for ([(a, b), (c, d)], band) in &cells {
            assert!(*band < 5);
            x0 = x0.min(*a);
            y0 = y0.min(*b);
            x1 = x1.max(*c);
            y1 = y1.max(*d);
        }
        assert_eq!((x0, y0), (grid.low(), grid.low()));
        assert_eq!((x1, y1), (grid.high(), grid.high()));
    }

    #[test]
    fn test_figures_are_written() {
        let dir = TempDir::new().unwrap();
        let grid = build_grid(-500.0, 500.0, 30).unwrap();

        let surface = dir.path().join("surface.svg");
        render_surface(&grid, &surface).unwrap();
        assert!(surface.exists());

        let contour = dir.path().join("nested/contour.svg");
        render_contour(&grid, 10).unwrap().save(&contour).unwrap();
        assert!(contour.exists());

        let edges = linspace(0.0, 10.0, 11);
        let a = Histogram::from_values(&[1.0, 2.0, 2.5], &edges);
        let b = Histogram::from_values(&[7.0], &edges);
        let hist = dir.path().join("hist.svg");
        render_histogram(
            &[
                HistogramSeries { label: "S=1", histogram: &a },
                HistogramSeries { label: "S=2", histogram: &b },
            ],
            3,
            &hist,
        )
        .unwrap();
        let svg = std::fs::read_to_string(&hist).unwrap();
        assert!(svg.contains("S=1") && svg.contains("S=2"));
    }

    #[test]
    fn test_histogram_rejects_mismatched_edges() {
        let dir = TempDir::new().unwrap();
        let a = Histogram::from_values(&[1.0], &linspace(0.0, 2.0, 3));
        let b = Histogram::from_values(&[1.0], &linspace(0.0, 4.0, 3));
        let err = render_histogram(
            &[
                HistogramSeries { label: "a", histogram: &a },
                HistogramSeries { label: "b", histogram: &b },
            ],
            1,
            &dir.path().join("x.svg"),
        )
        .unwrap_err();
        assert!(matches!(err, HarnessError::Render(_)));
        assert!(render_histogram(&[], 1, &dir.path().join("y.svg")).is_err());
    }
}

//! Draw population snapshots on top of a landscape contour, and report the
//! best individual of a snapshot.

use plotters::prelude::*;
use serde::Serialize;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

use crate::error::{HarnessError, Result};
use crate::landscape::LandscapeGrid;
use crate::logging::{log, obj, v_str, Domain, Level, ProfileScope};
use crate::render::{landscape_chart, render_contour, with_figure};
use crate::snapshot::{GroupRange, PopulationSnapshot};

pub const DEFAULT_CONTOUR_LEVELS: usize = 20;

/// Overlay `snapshot` on a contour of `grid`, one labelled marker set per
/// group (the whole snapshot when `groups` is `None`), and write it to `path`.
///
/// Uses the first two coordinates of each row. Points outside the grid's
/// square are clipped by the chart.
pub fn overlay(
    grid: &Arc<LandscapeGrid>,
    snapshot: &PopulationSnapshot,
    groups: Option<&[GroupRange]>,
    path: &Path,
) -> Result<()> {
    if snapshot.dimension() < 2 {
        return Err(HarnessError::SnapshotLoadFailure {
            path: snapshot.path().to_path_buf(),
            reason: format!("overlay needs 2 coordinate columns, found {}", snapshot.dimension()),
        });
    }
    let parts = snapshot.partition(groups)?;
    let contour = render_contour(grid, DEFAULT_CONTOUR_LEVELS)?;
    let _scope = ProfileScope::with_context("overlay", &[("rows", json!(snapshot.len()))]);

    let title = snapshot
        .path()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "population".to_string());

    with_figure(path, (900, 800), |root| {
        let mut chart = landscape_chart(root, grid, &title)?;
        contour.draw_on(&mut chart)?;

        for (i, group) in parts.iter().enumerate() {
            let color = Palette99::pick(i).to_rgba();
            let label = match groups {
                Some(_) => format!("rows {}", group.range),
                None => format!("population ({})", group.rows.len()),
            };
            let points = group
                .rows
                .iter()
                .map(|r| Circle::new((r.coordinates[0], r.coordinates[1]), 3, color.filled()));
            chart
                .draw_series(points)?
                .label(label)
                .legend(move |(x, y)| Circle::new((x + 6, y), 4, color.filled()));
        }

        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()?;
        Ok(())
    })?;

    log(
        Level::Info,
        Domain::Overlay,
        "overlay_written",
        obj(&[
            ("snapshot", v_str(&snapshot.path().display().to_string())),
            ("groups", json!(parts.len())),
            ("output", v_str(&path.display().to_string())),
        ]),
    );
    Ok(())
}

/// Textual best-solution report.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BestSolutionReport {
    pub decision_vector: Vec<f64>,
    pub fitness: f64,
}

impl BestSolutionReport {
    pub fn from_snapshot(snapshot: &PopulationSnapshot) -> Result<Self> {
        let row = snapshot.best_solution()?;
        Ok(Self {
            decision_vector: row.coordinates.clone(),
            fitness: row.fitness.ok_or(HarnessError::MissingFitness)?,
        })
    }
}

impl std::fmt::Display for BestSolutionReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let coords: Vec<String> = self.decision_vector.iter().map(|v| format!("{:.6}", v)).collect();
        write!(f, "decision vector: [{}]  fitness: {:.6}", coords.join(", "), self.fitness)
    }
}

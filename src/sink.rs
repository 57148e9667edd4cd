//! Manifest sink: records every delivered frame and writes a JSON manifest.
//!
//! The manifest is what the rendering job consumes. Each entry carries the
//! frame's render context plus summary statistics of the decoded grid; the
//! grid itself is not retained once the statistics are taken.

use crate::pipeline::{Frame, FrameSink, RenderContext, RunSummary};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManifestEntry {
    pub index: usize,
    pub output_name: String,
    pub title: String,
    pub date_label: String,
    pub path: String,
    pub collection_tag: String,
    pub variable: String,
    pub declared_type: String,
    pub shape: Vec<usize>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
}

#[derive(Debug, Serialize)]
struct Manifest<'a> {
    summary: &'a RunSummary,
    frames: &'a [ManifestEntry],
}

pub struct ManifestSink {
    path: PathBuf,
    entries: Vec<ManifestEntry>,
}

impl ManifestSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: Vec::new(),
        }
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the manifest, creating the parent directory if needed.
    pub fn write(&self, summary: &RunSummary) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let manifest = Manifest {
            summary,
            frames: &self.entries,
        };
        fs::write(&self.path, serde_json::to_string_pretty(&manifest)?)?;
        Ok(())
    }
}

impl FrameSink for ManifestSink {
    fn accept(&mut self, frame: Frame, context: &RenderContext) -> Result<(), Box<dyn std::error::Error>> {
        let stats = frame.grid.stats();
        self.entries.push(ManifestEntry {
            index: frame.index,
            output_name: context.output_name.clone(),
            title: context.title.clone(),
            date_label: frame.date_label,
            path: frame.file_ref.archive_relative_path,
            collection_tag: frame.file_ref.collection_tag,
            variable: frame.grid.variable,
            declared_type: frame.grid.declared_type,
            shape: frame.grid.declared_shape,
            min: stats.map(|s| s.min),
            max: stats.map(|s| s.max),
            mean: stats.map(|s| s.mean),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collections::{find_collection, Collection, DEFAULT_COLLECTION};
    use crate::model::{ArrayGrid, FileRef};
    use ndarray::array;

    fn frame(index: usize, day: u32) -> Frame {
        let file_ref = FileRef {
            archive_relative_path: format!("/C/2021/oco2_GEOS_L3CO2_day_202110{:02}_B10206Ar.nc4", day),
            year: 2021,
            month: 10,
            day,
            collection_tag: "C/B10206Ar".to_string(),
            series_prefix: "/C/2021/oco2_GEOS_L3CO2_day_".to_string(),
        };
        Frame {
            index,
            date_label: file_ref.date_label(),
            grid: ArrayGrid {
                file_ref: file_ref.clone(),
                variable: "XCO2".to_string(),
                declared_type: "Float32".to_string(),
                declared_shape: vec![1, 2, 2],
                values: array![[4.0e-4, 4.1e-4], [f64::NAN, 4.2e-4]],
            },
            file_ref,
        }
    }

    #[test]
    fn test_accept_records_context_and_stats() {
        let c = Collection::from_spec(find_collection(DEFAULT_COLLECTION).unwrap()).unwrap();
        let mut sink = ManifestSink::new("unused.json");
        let f = frame(0, 1);
        let ctx = RenderContext::for_frame(&c, f.index, &f.date_label);
        sink.accept(f, &ctx).unwrap();

        let entry = &sink.entries()[0];
        assert_eq!(entry.output_name, "0_.jpeg");
        assert_eq!(entry.date_label, "2021-10-01");
        assert_eq!(entry.shape, vec![1, 2, 2]);
        assert_eq!(entry.min, Some(4.0e-4));
        assert_eq!(entry.max, Some(4.2e-4));
    }

    #[test]
    fn test_write_creates_directory_and_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("manifest.json");
        let c = Collection::from_spec(find_collection(DEFAULT_COLLECTION).unwrap()).unwrap();
        let mut sink = ManifestSink::new(&path);
        for (i, day) in [(0, 1), (1, 3)] {
            let f = frame(i, day);
            let ctx = RenderContext::for_frame(&c, i, &f.date_label);
            sink.accept(f, &ctx).unwrap();
        }

        let summary = RunSummary {
            year: 2021,
            month: 10,
            selected: 2,
            succeeded: 2,
            ..RunSummary::default()
        };
        sink.write(&summary).unwrap();

        let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["summary"]["succeeded"], 2);
        assert_eq!(json["frames"].as_array().unwrap().len(), 2);
        assert_eq!(json["frames"][1]["output_name"], "1_.jpeg");
        assert_eq!(json["frames"][1]["date_label"], "2021-10-03");
    }
}

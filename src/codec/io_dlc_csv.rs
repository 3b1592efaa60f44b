//! DeepLabCut-style CSV reader and writer.
//!
//! The table carries a multi-row header (`scorer`, optional `individuals`,
//! `bodyparts`, `coords`) followed by one data row per frame image. Decode
//! synthesizes a skeleton from the bodyparts row, maps individuals to
//! tracks, and groups every row image into one `ImageSequence` video. A
//! sibling `config.yaml` next to the CSV, when present, supplies skeleton
//! edge pairs.
//!
//! # Frame indices
//!
//! The frame index comes from the trailing digits of the row's image file
//! stem (`img00037.png` -> 37); rows without trailing digits fall back to
//! row order.
//!
//! # Scores
//!
//! A `likelihood` column maps to the per-point score. An instance is
//! predicted when at least one of its points carries a likelihood; its
//! instance-level score is the mean of those values. Rows without
//! likelihood decode as user-labeled.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::{DecodeStage, LabelsBuilder};
use crate::error::PoselabError;
use crate::model::{
    Instance, Labels, Point, Skeleton, TrackId, Track, Video, VideoSource,
};

/// Column positions for one (individual, bodypart) pairing.
#[derive(Clone, Copy, Debug, Default)]
struct SlotColumns {
    x: Option<usize>,
    y: Option<usize>,
    likelihood: Option<usize>,
}

/// The subset of a DLC project config this codec consumes.
#[derive(Debug, Default, Deserialize)]
struct DlcConfig {
    /// Edge pairs as bodypart name lists.
    #[serde(default)]
    skeleton: Vec<Vec<String>>,
}

// ============================================================================
// Public API
// ============================================================================

/// Reads a `Labels` value from a DLC-style CSV file.
///
/// A `config.yaml` in the same directory, when present, contributes
/// skeleton edges; pairs naming unknown bodyparts are ignored since project
/// configs often cover a superset of the labeled parts.
pub fn read_dlc_csv(path: &Path) -> Result<Labels, PoselabError> {
    let records = read_records(path)?;
    let edges = sibling_config_edges(path)?;
    records_to_labels(records, path, &edges)
}

/// Writes a `Labels` value to a DLC-style CSV file.
pub fn write_dlc_csv(path: &Path, labels: &Labels) -> Result<(), PoselabError> {
    let file = fs::File::create(path).map_err(PoselabError::Io)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_writer(std::io::BufWriter::new(file));
    write_table(&mut writer, labels).map_err(|source| PoselabError::DlcCsvWrite {
        path: path.to_path_buf(),
        source,
    })?;
    writer.flush().map_err(PoselabError::Io)
}

/// Reads a `Labels` value from CSV text. No config lookup is attempted.
pub fn from_dlc_str(text: &str) -> Result<Labels, PoselabError> {
    let path = Path::new("<string>");
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());
    let mut records = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|source| PoselabError::DlcCsvParse {
            path: path.to_path_buf(),
            source,
        })?;
        records.push(record);
    }
    records_to_labels(records, path, &[])
}

/// Serializes a `Labels` value to CSV text.
pub fn to_dlc_string(labels: &Labels) -> Result<String, PoselabError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_writer(Vec::new());
    write_table(&mut writer, labels).map_err(|source| PoselabError::DlcCsvWrite {
        path: Path::new("<string>").to_path_buf(),
        source,
    })?;
    let bytes = writer
        .into_inner()
        .map_err(|e| PoselabError::Io(std::io::Error::other(e.to_string())))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

// ============================================================================
// Decode
// ============================================================================

fn read_records(path: &Path) -> Result<Vec<csv::StringRecord>, PoselabError> {
    let file = fs::File::open(path).map_err(PoselabError::Io)?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(std::io::BufReader::new(file));
    let mut records = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|source| PoselabError::DlcCsvParse {
            path: path.to_path_buf(),
            source,
        })?;
        records.push(record);
    }
    Ok(records)
}

fn sibling_config_edges(path: &Path) -> Result<Vec<(String, String)>, PoselabError> {
    let config_path = match path.parent() {
        Some(parent) => parent.join("config.yaml"),
        None => return Ok(Vec::new()),
    };
    if !config_path.is_file() {
        return Ok(Vec::new());
    }
    let text = fs::read_to_string(&config_path).map_err(PoselabError::Io)?;
    let config: DlcConfig =
        serde_yaml::from_str(&text).map_err(|source| PoselabError::DlcConfigParse {
            path: config_path,
            source,
        })?;
    Ok(config
        .skeleton
        .into_iter()
        .filter_map(|pair| match pair.as_slice() {
            [a, b] => Some((a.clone(), b.clone())),
            _ => None,
        })
        .collect())
}

fn records_to_labels(
    records: Vec<csv::StringRecord>,
    path: &Path,
    config_edges: &[(String, String)],
) -> Result<Labels, PoselabError> {
    let mut builder = LabelsBuilder::new("dlc-csv", path);

    let mut scorer: Option<String> = None;
    let mut individuals_row: Option<csv::StringRecord> = None;
    let mut bodyparts_row: Option<csv::StringRecord> = None;
    let mut coords_row: Option<csv::StringRecord> = None;
    let mut data_start = 0;

    for (pos, record) in records.iter().enumerate() {
        match record.get(0) {
            Some("scorer") => {
                scorer = record.iter().skip(1).find(|c| !c.is_empty()).map(str::to_string);
            }
            Some("individuals") => individuals_row = Some(record.clone()),
            Some("bodyparts") => bodyparts_row = Some(record.clone()),
            Some("coords") => coords_row = Some(record.clone()),
            _ => {
                data_start = pos;
                break;
            }
        }
        data_start = pos + 1;
    }

    let bodyparts_row = bodyparts_row
        .ok_or_else(|| builder.malformed(DecodeStage::Parse, "missing 'bodyparts' header row"))?;
    let coords_row = coords_row
        .ok_or_else(|| builder.malformed(DecodeStage::Parse, "missing 'coords' header row"))?;

    // Column map: first-seen order of individuals and bodyparts defines
    // track and node order. A table without an individuals row is
    // single-animal; its one slot has no track.
    let mut individuals: Vec<String> = Vec::new();
    let mut bodyparts: Vec<String> = Vec::new();
    let mut columns: HashMap<(usize, usize), SlotColumns> = HashMap::new();

    let width = bodyparts_row.len().max(coords_row.len());
    for col in 1..width {
        let bodypart = match bodyparts_row.get(col) {
            Some(name) if !name.is_empty() => name,
            _ => continue,
        };
        let coord = coords_row.get(col).unwrap_or("");
        let individual = individuals_row
            .as_ref()
            .and_then(|r| r.get(col))
            .unwrap_or("")
            .to_string();

        let ind_idx = match individuals.iter().position(|i| *i == individual) {
            Some(idx) => idx,
            None => {
                individuals.push(individual);
                individuals.len() - 1
            }
        };
        let node_idx = match bodyparts.iter().position(|b| b == bodypart) {
            Some(idx) => idx,
            None => {
                bodyparts.push(bodypart.to_string());
                bodyparts.len() - 1
            }
        };

        let slot = columns.entry((ind_idx, node_idx)).or_default();
        match coord {
            "x" => slot.x = Some(col),
            "y" => slot.y = Some(col),
            "likelihood" => slot.likelihood = Some(col),
            other => {
                return Err(builder.malformed(
                    DecodeStage::Parse,
                    format!("unknown coords label '{}' in column {}", other, col),
                ))
            }
        }
    }

    if bodyparts.is_empty() {
        return Err(builder.malformed(DecodeStage::Parse, "bodyparts row names no parts"));
    }

    // Registry stage.
    let skeleton_name = scorer.clone().unwrap_or_else(|| "dlc".to_string());
    let mut skeleton = Skeleton::with_nodes(&skeleton_name, bodyparts.iter().cloned())
        .map_err(|e| builder.malformed(DecodeStage::Registries, e.to_string()))?;
    for (a, b) in config_edges {
        if skeleton.node_index(a).is_some() && skeleton.node_index(b).is_some() {
            let _ = skeleton.add_edge(a, b);
        }
    }
    let skeleton_id = builder.intern_skeleton("skeleton", skeleton);

    let has_individuals = individuals_row.is_some();
    let track_ids: Vec<Option<TrackId>> = individuals
        .iter()
        .map(|name| {
            if has_individuals && !name.is_empty() {
                Some(builder.intern_track(format!("individual:{name}"), Track::new(name.clone())))
            } else {
                None
            }
        })
        .collect();

    let data_rows: Vec<&csv::StringRecord> = records[data_start..]
        .iter()
        .filter(|r| r.iter().any(|c| !c.is_empty()))
        .collect();

    let mut frame_paths: Vec<(u64, PathBuf)> = Vec::new();
    for (row_pos, record) in data_rows.iter().enumerate() {
        let image = record.get(0).unwrap_or("");
        let frame_idx = parse_frame_idx(image).unwrap_or(row_pos as u64);
        frame_paths.push((frame_idx, PathBuf::from(image)));
    }
    frame_paths.sort();
    let video = builder.intern_video(
        "sequence",
        Video::image_sequence(frame_paths.iter().map(|(_, p)| p.clone())),
    );

    if let Some(scorer) = &scorer {
        builder.set_provenance("dlc.scorer", serde_json::Value::String(scorer.clone()));
    }

    // Frame stage.
    for (row_pos, record) in data_rows.iter().enumerate() {
        let image = record.get(0).unwrap_or("");
        let frame_idx = parse_frame_idx(image).unwrap_or(row_pos as u64);

        let mut instances = Vec::new();
        for (ind_idx, track) in track_ids.iter().enumerate() {
            let mut points = Vec::with_capacity(bodyparts.len());
            for node_idx in 0..bodyparts.len() {
                let slot = columns.get(&(ind_idx, node_idx)).copied().unwrap_or_default();
                let x = parse_cell(&builder, record, slot.x, image)?;
                let y = parse_cell(&builder, record, slot.y, image)?;
                let likelihood = parse_cell(&builder, record, slot.likelihood, image)?;
                let point = match (x, y) {
                    (Some(x), Some(y)) => {
                        let p = Point::new(x, y);
                        match likelihood {
                            Some(l) => p.with_score(l),
                            None => p,
                        }
                    }
                    _ => Point::missing(),
                };
                points.push(point);
            }

            if points.iter().all(Point::is_missing) {
                continue;
            }

            let scores: Vec<f64> = points.iter().filter_map(|p| p.score).collect();
            let instance = {
                let skeleton = builder.registry().skeleton(skeleton_id).ok_or_else(|| {
                    builder.malformed(DecodeStage::Frames, "skeleton registry miss")
                })?;
                if scores.is_empty() {
                    Instance::user(skeleton_id, skeleton, points)?
                } else {
                    let mean = scores.iter().sum::<f64>() / scores.len() as f64;
                    Instance::predicted(skeleton_id, skeleton, points, mean)?
                }
            };
            let instance = match track {
                Some(track) => instance.with_track(*track),
                None => instance,
            };
            instances.push(instance);
        }

        if !instances.is_empty() {
            builder.link_frame(video, frame_idx, instances);
        }
    }

    builder.finish()
}

fn parse_cell(
    builder: &LabelsBuilder,
    record: &csv::StringRecord,
    col: Option<usize>,
    image: &str,
) -> Result<Option<f64>, PoselabError> {
    let Some(col) = col else { return Ok(None) };
    let cell = record.get(col).unwrap_or("").trim();
    if cell.is_empty() {
        return Ok(None);
    }
    cell.parse::<f64>().map(Some).map_err(|_| {
        builder.malformed(
            DecodeStage::Frames,
            format!("row '{}' column {} has non-numeric cell '{}'", image, col, cell),
        )
    })
}

/// Trailing digits of the file stem, e.g. `img00037.png` -> 37.
fn parse_frame_idx(image: &str) -> Option<u64> {
    let stem = Path::new(image).file_stem()?.to_str()?;
    let digits: String = stem
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}

// ============================================================================
// Encode
// ============================================================================

fn write_table<W: Write>(
    writer: &mut csv::Writer<W>,
    labels: &Labels,
) -> Result<(), csv::Error> {
    // Node order: first-seen union across all skeletons, so mixed datasets
    // still get one coherent bodyparts row.
    let mut bodyparts: Vec<String> = Vec::new();
    for skeleton in labels.skeletons() {
        for name in skeleton.node_names() {
            if !bodyparts.iter().any(|b| b == name) {
                bodyparts.push(name.to_string());
            }
        }
    }

    // Individual slots: real tracks first, then synthesized slots for the
    // widest untracked frame.
    let mut slots: Vec<(String, Option<TrackId>)> = labels
        .tracks()
        .iter()
        .enumerate()
        .map(|(pos, track)| (track.name.clone(), Some(TrackId(pos as u32))))
        .collect();
    let max_untracked = labels
        .frames()
        .map(|f| f.instances.iter().filter(|i| i.track.is_none()).count())
        .max()
        .unwrap_or(0);
    let base = slots.len();
    for n in 0..max_untracked {
        slots.push((format!("individual{}", base + n + 1), None));
    }
    if slots.is_empty() {
        slots.push(("individual1".to_string(), None));
    }

    let multi_animal = !labels.tracks().is_empty() || slots.len() > 1;
    let with_likelihood = labels
        .frames()
        .flat_map(|f| f.instances.iter())
        .any(|i| i.points().iter().any(|p| p.score.is_some()));
    let stride = if with_likelihood { 3 } else { 2 };

    let scorer = labels
        .provenance
        .get("dlc.scorer")
        .and_then(|v| v.as_str())
        .unwrap_or("poselab")
        .to_string();

    let width = 1 + slots.len() * bodyparts.len() * stride;
    let coords: &[&str] = if with_likelihood {
        &["x", "y", "likelihood"]
    } else {
        &["x", "y"]
    };

    let mut scorer_row = vec!["scorer".to_string()];
    let mut individuals_row = vec!["individuals".to_string()];
    let mut bodyparts_row = vec!["bodyparts".to_string()];
    let mut coords_row = vec!["coords".to_string()];
    for (slot_name, _) in &slots {
        for bodypart in &bodyparts {
            for coord in coords {
                scorer_row.push(scorer.clone());
                individuals_row.push(slot_name.clone());
                bodyparts_row.push(bodypart.clone());
                coords_row.push((*coord).to_string());
            }
        }
    }
    debug_assert_eq!(scorer_row.len(), width);

    writer.write_record(&scorer_row)?;
    if multi_animal {
        writer.write_record(&individuals_row)?;
    }
    writer.write_record(&bodyparts_row)?;
    writer.write_record(&coords_row)?;

    for frame in labels.frames() {
        let image = labels
            .video(frame.video)
            .map(|v| row_image_name(&v.source, frame.frame_idx))
            .unwrap_or_else(|| format!("img{:05}.png", frame.frame_idx));

        // Tracked instances go to their track's slot; untracked fill the
        // synthesized slots in order.
        let mut by_slot: Vec<Option<&Instance>> = vec![None; slots.len()];
        let mut next_free = labels.tracks().len();
        for instance in &frame.instances {
            match instance.track {
                Some(track) => {
                    let pos = track.as_u32() as usize;
                    if pos < by_slot.len() {
                        by_slot[pos] = Some(instance);
                    }
                }
                None => {
                    if next_free < by_slot.len() {
                        by_slot[next_free] = Some(instance);
                        next_free += 1;
                    }
                }
            }
        }

        let mut row = vec![image];
        for instance in &by_slot {
            for bodypart in &bodyparts {
                let point = instance.and_then(|i| {
                    labels
                        .skeleton(i.skeleton)
                        .and_then(|s| s.node_index(bodypart))
                        .map(|idx| i.points()[idx])
                });
                match point {
                    Some(p) if !p.is_missing() => {
                        row.push(p.x.to_string());
                        row.push(p.y.to_string());
                        if with_likelihood {
                            row.push(p.score.map(|s| s.to_string()).unwrap_or_default());
                        }
                    }
                    _ => {
                        for _ in 0..stride {
                            row.push(String::new());
                        }
                    }
                }
            }
        }
        writer.write_record(&row)?;
    }

    Ok(())
}

/// Picks the row image name for a frame: the sequence path whose trailing
/// digits match the frame index when one exists, a synthesized name
/// otherwise.
fn row_image_name(source: &VideoSource, frame_idx: u64) -> String {
    match source {
        VideoSource::ImageSequence { paths } => paths
            .iter()
            .find(|p| parse_frame_idx(&p.display().to_string()) == Some(frame_idx))
            .or_else(|| paths.get(frame_idx as usize))
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| format!("img{:05}.png", frame_idx)),
        VideoSource::MediaFile { path } => format!("{}.{:05}.png", path.display(), frame_idx),
        VideoSource::EmbeddedArray { key } => format!("{}.{:05}.png", key, frame_idx),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn multi_animal_csv() -> String {
        [
            "scorer,anna,anna,anna,anna,anna,anna,anna,anna,anna,anna,anna,anna",
            "individuals,mouse1,mouse1,mouse1,mouse1,mouse1,mouse1,mouse2,mouse2,mouse2,mouse2,mouse2,mouse2",
            "bodyparts,nose,nose,nose,tail,tail,tail,nose,nose,nose,tail,tail,tail",
            "coords,x,y,likelihood,x,y,likelihood,x,y,likelihood,x,y,likelihood",
            "img00003.png,10.0,20.0,0.9,30.0,40.0,0.8,,,,50.0,60.0,0.7",
            "img00007.png,11.0,21.0,0.95,,,,,,,,,",
        ]
        .join("\n")
    }

    fn single_animal_csv() -> String {
        [
            "scorer,anna,anna,anna,anna",
            "bodyparts,nose,nose,tail,tail",
            "coords,x,y,x,y",
            "frame_a.png,1.0,2.0,3.0,4.0",
            "frame_b.png,5.0,6.0,,",
        ]
        .join("\n")
    }

    #[test]
    fn test_decode_multi_animal_header() {
        let labels = from_dlc_str(&multi_animal_csv()).expect("parse");

        assert_eq!(labels.skeletons().len(), 1);
        assert_eq!(
            labels.skeletons()[0].node_names().collect::<Vec<_>>(),
            vec!["nose", "tail"]
        );
        let track_names: Vec<&str> =
            labels.tracks().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(track_names, vec!["mouse1", "mouse2"]);
        assert_eq!(labels.len(), 2);
    }

    #[test]
    fn test_frame_index_from_trailing_digits() {
        let labels = from_dlc_str(&multi_animal_csv()).expect("parse");
        let keys: Vec<u64> = labels.frames().map(|f| f.frame_idx).collect();
        assert_eq!(keys, vec![3, 7]);
    }

    #[test]
    fn test_likelihood_becomes_point_score_and_mean_instance_score() {
        let labels = from_dlc_str(&multi_animal_csv()).expect("parse");
        let frame = labels.frames().next().unwrap();

        // mouse1: both points labeled with likelihoods.
        let mouse1 = &frame.instances[0];
        assert!(mouse1.is_predicted());
        assert_eq!(mouse1.points()[0].score, Some(0.9));
        assert!((mouse1.score().unwrap() - 0.85).abs() < 1e-12);

        // mouse2: nose missing, tail labeled.
        let mouse2 = &frame.instances[1];
        assert!(mouse2.points()[0].is_missing());
        assert_eq!(mouse2.points()[1].x, 50.0);
        assert_eq!(mouse2.labeled_count(), 1);
    }

    #[test]
    fn test_all_missing_individual_yields_no_instance() {
        let labels = from_dlc_str(&multi_animal_csv()).expect("parse");
        let frame = labels.find_frame(labels.frames().next().unwrap().video, 7).unwrap();
        // Only mouse1 is labeled in the second row.
        assert_eq!(frame.instances.len(), 1);
    }

    #[test]
    fn test_single_animal_has_no_tracks_and_user_scoring() {
        let labels = from_dlc_str(&single_animal_csv()).expect("parse");
        assert!(labels.tracks().is_empty());
        // No trailing digits: row order supplies indices.
        let keys: Vec<u64> = labels.frames().map(|f| f.frame_idx).collect();
        assert_eq!(keys, vec![0, 1]);
        let frame = labels.frames().next().unwrap();
        assert!(!frame.instances[0].is_predicted());
        assert!(frame.instances[0].track.is_none());
    }

    #[test]
    fn test_missing_bodyparts_row_is_malformed() {
        let err = from_dlc_str("scorer,a\ncoords,x\nimg.png,1.0").unwrap_err();
        assert!(matches!(err, PoselabError::Format { .. }));
    }

    #[test]
    fn test_non_numeric_cell_is_malformed() {
        let csv = [
            "scorer,anna,anna",
            "bodyparts,nose,nose",
            "coords,x,y",
            "img.png,abc,2.0",
        ]
        .join("\n");
        let err = from_dlc_str(&csv).unwrap_err();
        assert!(matches!(err, PoselabError::Format { .. }));
    }

    #[test]
    fn test_roundtrip_preserves_poses_and_tracks() {
        let original = from_dlc_str(&multi_animal_csv()).expect("parse");
        let text = to_dlc_string(&original).expect("serialize");
        let restored = from_dlc_str(&text).expect("reparse");

        assert_eq!(original.skeletons()[0].node_names().collect::<Vec<_>>(),
            restored.skeletons()[0].node_names().collect::<Vec<_>>());
        assert_eq!(original.tracks(), restored.tracks());
        assert_eq!(original.len(), restored.len());

        let a = original.frames().next().unwrap();
        let b = restored.frames().next().unwrap();
        assert_eq!(a.frame_idx, b.frame_idx);
        assert_eq!(a.instances.len(), b.instances.len());
        assert!(a.instances[0].same_pose(&b.instances[0]));
    }

    #[test]
    fn test_config_yaml_contributes_edges() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("labels.csv");
        fs::write(&csv_path, single_animal_csv()).unwrap();
        fs::write(
            dir.path().join("config.yaml"),
            "skeleton:\n  - [nose, tail]\n  - [nose, unknown_part]\n",
        )
        .unwrap();

        let labels = read_dlc_csv(&csv_path).expect("read");
        let skeleton = &labels.skeletons()[0];
        // The known pair lands; the pair naming an unknown part is ignored.
        assert_eq!(skeleton.edges().count(), 1);
    }

    #[test]
    fn test_scorer_roundtrips_via_provenance() {
        let labels = from_dlc_str(&single_animal_csv()).expect("parse");
        assert_eq!(
            labels.provenance.get("dlc.scorer"),
            Some(&serde_json::Value::String("anna".to_string()))
        );
        let text = to_dlc_string(&labels).expect("serialize");
        assert!(text.starts_with("scorer,anna"));
    }
}

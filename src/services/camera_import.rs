//! Camera calibration import with read-after-write verification.
//!
//! Cameras come from the text export of the reconstruction tool
//! (`CAMERA_ID MODEL WIDTH HEIGHT PARAMS[]`, `#` comments). After the
//! upserts are committed every camera is read back and compared with
//! what was written; any difference aborts the run, since later stages
//! would otherwise reconstruct against a corrupted calibration.

use crate::config::ModelTagPolicy;
use crate::database::models::CameraModel;
use crate::database::{DatabaseError, ReconstructionStore};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Tolerances of the tool's own Python helpers (`numpy.allclose`).
const RELATIVE_TOLERANCE: f64 = 1e-5;
const ABSOLUTE_TOLERANCE: f64 = 1e-8;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Could not read camera file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Camera file line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("Consistency check failed for camera {camera_id}: {reason}")]
    ConsistencyCheck { camera_id: i64, reason: String },
}

impl ImportError {
    pub fn is_consistency_failure(&self) -> bool {
        matches!(self, ImportError::ConsistencyCheck { .. })
    }
}

/// One parsed line of a camera file.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraEntry {
    pub line: usize,
    pub camera_id: i64,
    pub model_tag: String,
    pub width: u32,
    pub height: u32,
    pub params: Vec<f64>,
}

/// What was written for one camera, used as the verification reference.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraRecord {
    pub camera_id: i64,
    pub model: i32,
    pub width: u32,
    pub height: u32,
    pub params: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportReport {
    pub camera_ids: Vec<i64>,
    pub verified: usize,
}

pub fn parse_camera_file(path: &Path) -> Result<Vec<CameraEntry>, ImportError> {
    let content = fs::read_to_string(path).map_err(|source| ImportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_cameras(&content)
}

pub fn parse_cameras(content: &str) -> Result<Vec<CameraEntry>, ImportError> {
    let mut entries = Vec::new();

    for (index, raw) in content.lines().enumerate() {
        let line = index + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = trimmed.split_whitespace().collect();
        if fields.len() < 4 {
            return Err(ImportError::Parse {
                line,
                message: format!(
                    "expected `CAMERA_ID MODEL WIDTH HEIGHT PARAMS...`, got {} field(s)",
                    fields.len()
                ),
            });
        }

        let params = fields[4..]
            .iter()
            .map(|value| parse_field::<f64>(line, "parameter", value))
            .collect::<Result<Vec<_>, _>>()?;

        entries.push(CameraEntry {
            line,
            camera_id: parse_field(line, "camera id", fields[0])?,
            model_tag: fields[1].to_string(),
            width: parse_dimension(line, "width", fields[2])?,
            height: parse_dimension(line, "height", fields[3])?,
            params,
        });
    }

    Ok(entries)
}

fn parse_field<T: std::str::FromStr>(line: usize, what: &str, value: &str) -> Result<T, ImportError>
where
    T::Err: std::fmt::Display,
{
    value.parse::<T>().map_err(|e| ImportError::Parse {
        line,
        message: format!("invalid {} `{}`: {}", what, value, e),
    })
}

fn parse_dimension(line: usize, what: &str, value: &str) -> Result<u32, ImportError> {
    match parse_field::<u32>(line, what, value)? {
        0 => Err(ImportError::Parse {
            line,
            message: format!("{} must be positive", what),
        }),
        size => Ok(size),
    }
}

/// Model id stored for an entry under the given policy.
pub fn resolve_model(entry: &CameraEntry, policy: ModelTagPolicy) -> Result<i32, ImportError> {
    match policy {
        ModelTagPolicy::Collapse => Ok(CameraModel::SimplePinhole.id()),
        ModelTagPolicy::Map => {
            let model = CameraModel::from_name(&entry.model_tag).ok_or_else(|| {
                ImportError::Parse {
                    line: entry.line,
                    message: format!("unknown camera model `{}`", entry.model_tag),
                }
            })?;
            if model.num_params() != entry.params.len() {
                log::warn!(
                    "Camera {} uses {} which takes {} params, file gives {}",
                    entry.camera_id,
                    model.name(),
                    model.num_params(),
                    entry.params.len()
                );
            }
            Ok(model.id())
        }
    }
}

/// Upsert every entry. Nothing is committed here.
///
/// Every model is resolved before the first write, so a bad line leaves
/// the database untouched. A failed upsert rolls back the earlier ones.
pub fn write_cameras(
    store: &ReconstructionStore,
    entries: &[CameraEntry],
    policy: ModelTagPolicy,
) -> Result<Vec<CameraRecord>, ImportError> {
    let mut records = Vec::with_capacity(entries.len());
    let mut collapsed = 0;

    for entry in entries {
        let model = resolve_model(entry, policy)?;
        if policy == ModelTagPolicy::Collapse
            && !entry
                .model_tag
                .eq_ignore_ascii_case(CameraModel::SimplePinhole.name())
        {
            collapsed += 1;
        }
        records.push(CameraRecord {
            camera_id: entry.camera_id,
            model,
            width: entry.width,
            height: entry.height,
            params: entry.params.clone(),
        });
    }

    for record in &records {
        let written = store.upsert_camera(
            Some(record.camera_id),
            record.model,
            record.width,
            record.height,
            &record.params,
        );
        if let Err(e) = written {
            if let Err(rollback) = store.rollback() {
                log::warn!("Rollback after failed camera write failed: {}", rollback);
            }
            return Err(e.into());
        }
    }

    if collapsed > 0 {
        log::info!(
            "Stored {} camera(s) as {} regardless of their file model",
            collapsed,
            CameraModel::SimplePinhole.name()
        );
    }

    Ok(records)
}

/// Read every written camera back, in write order, and compare.
///
/// A camera id written more than once is only checked against its last
/// write.
pub fn verify_cameras(
    store: &ReconstructionStore,
    records: &[CameraRecord],
) -> Result<usize, ImportError> {
    let mut verified = 0;

    for (index, expected) in records.iter().enumerate() {
        let overwritten = records[index + 1..]
            .iter()
            .any(|later| later.camera_id == expected.camera_id);
        if overwritten {
            log::warn!(
                "Camera {} appears more than once; verifying its last entry",
                expected.camera_id
            );
            continue;
        }

        let stored =
            store
                .get_camera(expected.camera_id)
                .map_err(|e| ImportError::ConsistencyCheck {
                    camera_id: expected.camera_id,
                    reason: format!("read-back failed: {}", e),
                })?;

        let fail = |reason: String| ImportError::ConsistencyCheck {
            camera_id: expected.camera_id,
            reason,
        };

        if stored.camera_id != expected.camera_id {
            return Err(fail(format!("read back camera id {}", stored.camera_id)));
        }
        if stored.model != expected.model {
            return Err(fail(format!(
                "model {} != {}",
                stored.model, expected.model
            )));
        }
        if (stored.width, stored.height) != (expected.width, expected.height) {
            return Err(fail(format!(
                "size {}x{} != {}x{}",
                stored.width, stored.height, expected.width, expected.height
            )));
        }
        if !params_close(&stored.params, &expected.params) {
            return Err(fail(format!(
                "params {:?} != {:?}",
                stored.params, expected.params
            )));
        }

        verified += 1;
    }

    Ok(verified)
}

/// Element-wise `|a - b| <= atol + rtol * |b|` over equal-length slices.
pub fn params_close(actual: &[f64], expected: &[f64]) -> bool {
    actual.len() == expected.len()
        && actual.iter().zip(expected).all(|(a, b)| {
            if a == b {
                return true;
            }
            (a - b).abs() <= ABSOLUTE_TOLERANCE + RELATIVE_TOLERANCE * b.abs()
        })
}

/// Parse, upsert, commit and verify a camera file.
pub fn import_camera_file(
    store: &ReconstructionStore,
    path: &Path,
    policy: ModelTagPolicy,
) -> Result<ImportReport, ImportError> {
    let entries = parse_camera_file(path)?;
    log::info!(
        "Importing {} camera(s) from {}",
        entries.len(),
        path.display()
    );

    let records = write_cameras(store, &entries, policy)?;
    store.commit()?;

    let verified = verify_cameras(store, &records)?;
    log::info!("Verified {} camera(s) after commit", verified);

    Ok(ImportReport {
        camera_ids: records.iter().map(|r| r.camera_id).collect(),
        verified,
    })
}

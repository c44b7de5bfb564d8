use super::{decode_fixed, encode_fixed, Repository, Result};
use crate::blob::{self, Array, Dim, Element};
use crate::database::models::{CoordinateSystem, Descriptors, Keypoints, PosePrior};
use crate::database::DatabaseError;
use rusqlite::{params, Connection, OptionalExtension};

/// Keypoint layouts the external tool reads: x, y, then optional
/// scale/orientation or affine shape.
const KEYPOINT_COLS: [usize; 3] = [2, 4, 6];

/// Per-image payloads: pose priors, keypoints and descriptors.
pub struct FeatureRepository<'a> {
    conn: &'a Connection,
}

impl Repository for FeatureRepository<'_> {
    fn connection(&self) -> &Connection {
        self.conn
    }
}

impl<'a> FeatureRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn add_pose_prior(
        &self,
        image_id: i64,
        position: [f64; 3],
        coordinate_system: CoordinateSystem,
        position_covariance: Option<[f64; 9]>,
    ) -> Result<()> {
        self.writer()?.execute(
            "INSERT INTO pose_priors (image_id, position, coordinate_system, position_covariance)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                image_id,
                blob::encode_slice(&position),
                i32::from(coordinate_system),
                encode_fixed(position_covariance.as_ref()),
            ],
        )?;
        Ok(())
    }

    pub fn get_pose_prior(&self, image_id: i64) -> Result<PosePrior> {
        let row = self
            .conn
            .query_row(
                "SELECT position, coordinate_system, position_covariance
                 FROM pose_priors WHERE image_id = ?1",
                params![image_id],
                |row| {
                    Ok((
                        row.get::<_, Option<Vec<u8>>>(0)?,
                        row.get::<_, i32>(1)?,
                        row.get::<_, Option<Vec<u8>>>(2)?,
                    ))
                },
            )
            .optional()?;

        let (position, coordinate_system, covariance) = row.ok_or(DatabaseError::NotFound {
            entity: "pose prior",
            id: image_id,
        })?;

        let position = decode_fixed::<f64, 3>(position)?.ok_or_else(|| {
            DatabaseError::InvalidShape {
                entity: "pose prior",
                message: format!("image {} has no position", image_id),
            }
        })?;

        let coordinate_system = CoordinateSystem::from(coordinate_system);
        if coordinate_system == CoordinateSystem::Undefined {
            log::debug!("Pose prior for image {} has no coordinate system", image_id);
        }

        Ok(PosePrior {
            image_id,
            position,
            coordinate_system,
            position_covariance: decode_fixed::<f64, 9>(covariance)?,
        })
    }

    pub fn add_keypoints(&self, image_id: i64, keypoints: &Array<f32>) -> Result<()> {
        check_keypoint_shape(keypoints)?;
        insert_array(self.writer()?, "keypoints", image_id, keypoints)
    }

    /// Replace the whole keypoint blob of an image.
    pub fn update_keypoints(&self, image_id: i64, keypoints: &Array<f32>) -> Result<()> {
        check_keypoint_shape(keypoints)?;
        replace_array(self.writer()?, "keypoints", image_id, keypoints)
    }

    pub fn get_keypoints(&self, image_id: i64) -> Result<Keypoints> {
        let data = select_array(self.conn, "keypoints", image_id)?;
        Ok(Keypoints { image_id, data })
    }

    pub fn add_descriptors(&self, image_id: i64, descriptors: &Array<u8>) -> Result<()> {
        check_two_dims("descriptors", descriptors)?;
        insert_array(self.writer()?, "descriptors", image_id, descriptors)
    }

    pub fn update_descriptors(&self, image_id: i64, descriptors: &Array<u8>) -> Result<()> {
        check_two_dims("descriptors", descriptors)?;
        replace_array(self.writer()?, "descriptors", image_id, descriptors)
    }

    pub fn get_descriptors(&self, image_id: i64) -> Result<Descriptors> {
        let data = select_array(self.conn, "descriptors", image_id)?;
        Ok(Descriptors { image_id, data })
    }
}

fn check_keypoint_shape(keypoints: &Array<f32>) -> Result<()> {
    check_two_dims("keypoints", keypoints)?;
    if !KEYPOINT_COLS.contains(&keypoints.cols()) {
        return Err(DatabaseError::InvalidShape {
            entity: "keypoints",
            message: format!("expected 2, 4 or 6 columns, got {}", keypoints.cols()),
        });
    }
    Ok(())
}

pub(super) fn check_two_dims<T: Element>(entity: &'static str, array: &Array<T>) -> Result<()> {
    if array.shape().len() != 2 {
        return Err(DatabaseError::InvalidShape {
            entity,
            message: format!("expected a 2-D array, got shape {:?}", array.shape()),
        });
    }
    Ok(())
}

// `table` is always one of the crate's own table names, never user input.
pub(super) fn insert_array<T: Element>(
    conn: &Connection,
    table: &str,
    key: i64,
    array: &Array<T>,
) -> Result<()> {
    let sql = format!(
        "INSERT INTO {} ({}, rows, cols, data) VALUES (?1, ?2, ?3, ?4)",
        table,
        key_column(table)
    );
    conn.execute(
        &sql,
        params![
            key,
            array.rows() as i64,
            array.cols() as i64,
            blob::encode(array)
        ],
    )?;
    Ok(())
}

pub(super) fn replace_array<T: Element>(
    conn: &Connection,
    table: &'static str,
    key: i64,
    array: &Array<T>,
) -> Result<()> {
    let key_column = key_column(table);
    let sql = format!(
        "UPDATE {} SET rows = ?1, cols = ?2, data = ?3 WHERE {} = ?4",
        table, key_column
    );
    let updated = conn.execute(
        &sql,
        params![
            array.rows() as i64,
            array.cols() as i64,
            blob::encode(array),
            key
        ],
    )?;
    if updated == 0 {
        return Err(DatabaseError::NotFound { entity: table, id: key });
    }
    Ok(())
}

pub(super) fn select_array<T: Element>(
    conn: &Connection,
    table: &'static str,
    key: i64,
) -> Result<Array<T>> {
    let sql = format!(
        "SELECT rows, cols, data FROM {} WHERE {} = ?1",
        table,
        key_column(table)
    );
    let row = conn
        .query_row(&sql, params![key], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Option<Vec<u8>>>(2)?,
            ))
        })
        .optional()?;

    let (rows, cols, data) = row.ok_or(DatabaseError::NotFound { entity: table, id: key })?;
    decode_rows_cols(table, rows, cols, data.as_deref().unwrap_or_default())
}

pub(super) fn decode_rows_cols<T: Element>(
    entity: &'static str,
    rows: i64,
    cols: i64,
    data: &[u8],
) -> Result<Array<T>> {
    let (rows, cols) = match (usize::try_from(rows), usize::try_from(cols)) {
        (Ok(rows), Ok(cols)) => (rows, cols),
        _ => {
            return Err(DatabaseError::InvalidShape {
                entity,
                message: format!("negative shape {}x{}", rows, cols),
            })
        }
    };
    Ok(blob::decode::<T>(data, &[Dim::Fixed(rows), Dim::Fixed(cols)])?)
}

fn key_column(table: &str) -> &'static str {
    match table {
        "matches" | "two_view_geometries" => "pair_id",
        _ => "image_id",
    }
}

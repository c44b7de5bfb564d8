use super::feature::{check_two_dims, decode_rows_cols, insert_array, replace_array, select_array};
use super::{decode_fixed, encode_fixed, Repository, Result};
use crate::blob::{self, Array};
use crate::database::models::{
    image_ids_to_pair_id, Matches, TwoViewGeometry, TwoViewGeometryConfig,
};
use crate::database::DatabaseError;
use rusqlite::{params, Connection, OptionalExtension};

/// Raw correspondences and verified two-view geometries, keyed by pair id.
pub struct MatchRepository<'a> {
    conn: &'a Connection,
}

impl Repository for MatchRepository<'_> {
    fn connection(&self) -> &Connection {
        self.conn
    }
}

impl<'a> MatchRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Store matches between two images. Column 0 of `matches` indexes
    /// keypoints of `image_id1`; the stored orientation always puts the
    /// smaller image id first.
    pub fn add_matches(&self, image_id1: i64, image_id2: i64, matches: &Array<u32>) -> Result<i64> {
        let pair_id = image_ids_to_pair_id(image_id1, image_id2);
        let oriented = orient(image_id1, image_id2, matches)?;
        insert_array(self.writer()?, "matches", pair_id, &oriented)?;
        Ok(pair_id)
    }

    pub fn update_matches(
        &self,
        image_id1: i64,
        image_id2: i64,
        matches: &Array<u32>,
    ) -> Result<i64> {
        let pair_id = image_ids_to_pair_id(image_id1, image_id2);
        let oriented = orient(image_id1, image_id2, matches)?;
        replace_array(self.writer()?, "matches", pair_id, &oriented)?;
        Ok(pair_id)
    }

    /// Matches as stored, smaller image id in column 0.
    pub fn get_matches(&self, pair_id: i64) -> Result<Matches> {
        let data = select_array(self.conn, "matches", pair_id)?;
        Ok(Matches { pair_id, data })
    }

    /// Matches oriented so column 0 belongs to `image_id1`.
    pub fn matches_between(&self, image_id1: i64, image_id2: i64) -> Result<Array<u32>> {
        let pair_id = image_ids_to_pair_id(image_id1, image_id2);
        let stored = self.get_matches(pair_id)?.data;
        orient(image_id1, image_id2, &stored)
    }

    pub fn pair_ids(&self) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare("SELECT pair_id FROM matches")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }

    /// Store a verified geometry. Only the inlier matches are reoriented
    /// for a swapped pair; `F`, `E`, `H` and the relative pose must
    /// already describe the pair with the smaller image id first.
    pub fn add_two_view_geometry(
        &self,
        image_id1: i64,
        image_id2: i64,
        geometry: &TwoViewGeometry,
    ) -> Result<i64> {
        let pair_id = image_ids_to_pair_id(image_id1, image_id2);
        let oriented = orient(image_id1, image_id2, &geometry.matches)?;

        self.writer()?.execute(
            "INSERT INTO two_view_geometries
                (pair_id, rows, cols, data, config, F, E, H, qvec, tvec)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                pair_id,
                oriented.rows() as i64,
                oriented.cols() as i64,
                blob::encode(&oriented),
                i32::from(geometry.config),
                encode_fixed(geometry.f.as_ref()),
                encode_fixed(geometry.e.as_ref()),
                encode_fixed(geometry.h.as_ref()),
                encode_fixed(geometry.qvec.as_ref()),
                encode_fixed(geometry.tvec.as_ref()),
            ],
        )?;
        Ok(pair_id)
    }

    pub fn get_two_view_geometry(&self, pair_id: i64) -> Result<TwoViewGeometry> {
        let row = self
            .conn
            .query_row(
                "SELECT rows, cols, data, config, F, E, H, qvec, tvec
                 FROM two_view_geometries WHERE pair_id = ?1",
                params![pair_id],
                |row| {
                    Ok(RawGeometry {
                        rows: row.get(0)?,
                        cols: row.get(1)?,
                        data: row.get(2)?,
                        config: row.get(3)?,
                        f: row.get(4)?,
                        e: row.get(5)?,
                        h: row.get(6)?,
                        qvec: row.get(7)?,
                        tvec: row.get(8)?,
                    })
                },
            )
            .optional()?
            .ok_or(DatabaseError::NotFound {
                entity: "two view geometry",
                id: pair_id,
            })?;

        Ok(TwoViewGeometry {
            pair_id,
            matches: decode_rows_cols(
                "two view geometry",
                row.rows,
                row.cols,
                row.data.as_deref().unwrap_or_default(),
            )?,
            config: TwoViewGeometryConfig::from(row.config),
            f: decode_fixed(row.f)?,
            e: decode_fixed(row.e)?,
            h: decode_fixed(row.h)?,
            qvec: decode_fixed(row.qvec)?,
            tvec: decode_fixed(row.tvec)?,
        })
    }
}

struct RawGeometry {
    rows: i64,
    cols: i64,
    data: Option<Vec<u8>>,
    config: i32,
    f: Option<Vec<u8>>,
    e: Option<Vec<u8>>,
    h: Option<Vec<u8>>,
    qvec: Option<Vec<u8>>,
    tvec: Option<Vec<u8>>,
}

/// Validate an N x 2 match array and swap its columns when the pair
/// is given larger id first.
fn orient(image_id1: i64, image_id2: i64, matches: &Array<u32>) -> Result<Array<u32>> {
    check_two_dims("matches", matches)?;
    if matches.cols() != 2 {
        return Err(DatabaseError::InvalidShape {
            entity: "matches",
            message: format!("expected 2 columns, got {}", matches.cols()),
        });
    }
    if image_id1 <= image_id2 {
        return Ok(matches.clone());
    }

    let swapped = matches
        .as_slice()
        .chunks_exact(2)
        .flat_map(|pair| [pair[1], pair[0]])
        .collect();
    Ok(Array::matrix(matches.rows(), 2, swapped)?)
}

#[cfg(test)]
mod tests {
    use crate::blob::Array;
    use crate::database::models::{
        image_ids_to_pair_id, pair_id_to_image_ids, TwoViewGeometry, TwoViewGeometryConfig,
    };
    use crate::database::{DatabaseError, ReconstructionStore};
    use tempfile::{tempdir, TempDir};

    fn setup_test_db() -> (TempDir, ReconstructionStore) {
        let temp_dir = tempdir().unwrap();
        let store = ReconstructionStore::open_or_create(temp_dir.path().join("test.db")).unwrap();
        store.create_schema().unwrap();
        (temp_dir, store)
    }

    #[test]
    fn test_matches_stored_smaller_id_first() {
        let (_dir, store) = setup_test_db();
        let matches = Array::matrix(2, 2, vec![10u32, 20, 11, 21]).unwrap();

        let pair_id = store.matches().add_matches(5, 2, &matches).unwrap();
        assert_eq!(pair_id, image_ids_to_pair_id(2, 5));
        assert_eq!(pair_id_to_image_ids(pair_id), (2, 5));

        let stored = store.matches().get_matches(pair_id).unwrap();
        assert_eq!(stored.data.as_slice(), &[20, 10, 21, 11]);

        let oriented = store.matches().matches_between(5, 2).unwrap();
        assert_eq!(oriented, matches);
        assert_eq!(store.matches().pair_ids().unwrap(), vec![pair_id]);
    }

    #[test]
    fn test_update_matches_replaces_blob() {
        let (_dir, store) = setup_test_db();
        let first = Array::matrix(1, 2, vec![0u32, 1]).unwrap();
        let second = Array::matrix(3, 2, vec![0u32, 1, 2, 3, 4, 5]).unwrap();

        let pair_id = store.matches().add_matches(1, 2, &first).unwrap();
        store.matches().update_matches(1, 2, &second).unwrap();

        assert_eq!(store.matches().get_matches(pair_id).unwrap().data, second);
    }

    #[test]
    fn test_matches_need_two_columns() {
        let (_dir, store) = setup_test_db();
        let bad = Array::matrix(1, 3, vec![0u32, 1, 2]).unwrap();

        let err = store.matches().add_matches(1, 2, &bad).unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidShape { .. }));
    }

    #[test]
    fn test_two_view_geometry_optional_blobs() {
        let (_dir, store) = setup_test_db();
        let identity = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];

        let mut geometry = TwoViewGeometry::new(
            Array::matrix(1, 2, vec![3u32, 4]).unwrap(),
            TwoViewGeometryConfig::Calibrated,
        );
        geometry.e = Some(identity);
        geometry.qvec = Some([1.0, 0.0, 0.0, 0.0]);
        geometry.tvec = Some([0.0, 0.0, 1.0]);

        let pair_id = store
            .matches()
            .add_two_view_geometry(1, 2, &geometry)
            .unwrap();
        let stored = store.matches().get_two_view_geometry(pair_id).unwrap();

        assert_eq!(stored.pair_id, pair_id);
        assert_eq!(stored.config, TwoViewGeometryConfig::Calibrated);
        assert_eq!(stored.matches.as_slice(), &[3, 4]);
        assert_eq!(stored.f, None);
        assert_eq!(stored.e, Some(identity));
        assert_eq!(stored.h, None);
        assert_eq!(stored.qvec, Some([1.0, 0.0, 0.0, 0.0]));
        assert_eq!(stored.tvec, Some([0.0, 0.0, 1.0]));
    }

    #[test]
    fn test_missing_geometry_is_not_found() {
        let (_dir, store) = setup_test_db();
        assert!(store
            .matches()
            .get_two_view_geometry(12)
            .unwrap_err()
            .is_not_found());
    }
}

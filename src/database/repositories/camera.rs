use super::{Repository, Result};
use crate::blob;
use crate::database::models::{Camera, NewCamera};
use crate::database::DatabaseError;
use rusqlite::{params, Connection, OptionalExtension, Row};

pub struct CameraRepository<'a> {
    conn: &'a Connection,
}

impl Repository for CameraRepository<'_> {
    fn connection(&self) -> &Connection {
        self.conn
    }
}

impl<'a> CameraRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Plain insert. Fails with a constraint violation when `camera_id`
    /// is already taken.
    pub fn add(&self, camera: &NewCamera) -> Result<i64> {
        let conn = self.writer()?;
        conn.execute(
            "INSERT INTO cameras (camera_id, model, width, height, params, prior_focal_length)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                camera.camera_id,
                camera.model,
                camera.width,
                camera.height,
                blob::encode_slice(&camera.params),
                camera.prior_focal_length,
            ],
        )?;
        Ok(camera.camera_id.unwrap_or_else(|| conn.last_insert_rowid()))
    }

    /// Replace the calibration of an existing camera, or insert it.
    ///
    /// An existing row always ends up with `prior_focal_length` cleared.
    pub fn upsert(
        &self,
        camera_id: Option<i64>,
        model: i32,
        width: u32,
        height: u32,
        params: &[f64],
    ) -> Result<i64> {
        let conn = self.writer()?;
        conn.execute(
            "INSERT INTO cameras (camera_id, model, width, height, params, prior_focal_length)
             VALUES (?1, ?2, ?3, ?4, ?5, 0)
             ON CONFLICT(camera_id) DO UPDATE SET
                model = excluded.model,
                width = excluded.width,
                height = excluded.height,
                params = excluded.params,
                prior_focal_length = 0",
            params![camera_id, model, width, height, blob::encode_slice(params)],
        )?;

        // last_insert_rowid is not touched by the DO UPDATE branch.
        let id = camera_id.unwrap_or_else(|| conn.last_insert_rowid());
        log::debug!(
            "Upserted camera {} (model {}, {}x{}, {} params)",
            id,
            model,
            width,
            height,
            params.len()
        );
        Ok(id)
    }

    /// Update an existing camera only. Returns whether a row matched.
    pub fn update(
        &self,
        camera_id: i64,
        model: i32,
        width: u32,
        height: u32,
        params: &[f64],
    ) -> Result<bool> {
        let updated = self.writer()?.execute(
            "UPDATE cameras SET model = ?1, width = ?2, height = ?3, params = ?4,
             prior_focal_length = 0 WHERE camera_id = ?5",
            params![model, width, height, blob::encode_slice(params), camera_id],
        )?;
        Ok(updated > 0)
    }

    pub fn find_by_id(&self, camera_id: i64) -> Result<Camera> {
        let raw = self
            .conn
            .query_row(
                "SELECT camera_id, model, width, height, params, prior_focal_length
                 FROM cameras WHERE camera_id = ?1",
                params![camera_id],
                RawCamera::from_row,
            )
            .optional()?;

        match raw {
            Some(raw) => raw.decode(),
            None => Err(DatabaseError::NotFound {
                entity: "camera",
                id: camera_id,
            }),
        }
    }

    /// All cameras in storage order.
    pub fn find_all(&self) -> Result<Vec<Camera>> {
        let mut stmt = self.conn.prepare(
            "SELECT camera_id, model, width, height, params, prior_focal_length FROM cameras",
        )?;
        let rows = stmt
            .query_map([], RawCamera::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter().map(RawCamera::decode).collect()
    }

    pub fn exists(&self, camera_id: i64) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM cameras WHERE camera_id = ?1",
            params![camera_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn count(&self) -> Result<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM cameras", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Rejected with a constraint violation while any image references it.
    pub fn delete(&self, camera_id: i64) -> Result<bool> {
        let deleted = self
            .writer()?
            .execute("DELETE FROM cameras WHERE camera_id = ?1", params![camera_id])?;
        Ok(deleted > 0)
    }
}

struct RawCamera {
    camera_id: i64,
    model: i32,
    width: u32,
    height: u32,
    params: Option<Vec<u8>>,
    prior_focal_length: bool,
}

impl RawCamera {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            camera_id: row.get(0)?,
            model: row.get(1)?,
            width: row.get(2)?,
            height: row.get(3)?,
            params: row.get(4)?,
            prior_focal_length: row.get(5)?,
        })
    }

    fn decode(self) -> Result<Camera> {
        let params = match self.params {
            Some(bytes) => blob::decode_vec::<f64>(&bytes)?,
            None => Vec::new(),
        };
        Ok(Camera {
            camera_id: self.camera_id,
            model: self.model,
            width: self.width,
            height: self.height,
            params,
            prior_focal_length: self.prior_focal_length,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::database::{DatabaseError, ReconstructionStore};
    use crate::database::models::NewCamera;
    use tempfile::{tempdir, TempDir};

    fn setup_test_db() -> (TempDir, ReconstructionStore) {
        let temp_dir = tempdir().unwrap();
        let store = ReconstructionStore::open_or_create(temp_dir.path().join("test.db")).unwrap();
        store.create_schema().unwrap();
        (temp_dir, store)
    }

    #[test]
    fn test_upsert_inserts_then_replaces() {
        let (_dir, store) = setup_test_db();
        let repo = store.cameras();

        repo.add(&NewCamera {
            camera_id: Some(5),
            model: 1,
            width: 800,
            height: 600,
            params: vec![700.0, 710.0, 400.0, 300.0],
            prior_focal_length: true,
        })
        .unwrap();

        let id = repo
            .upsert(Some(5), 0, 1920, 1080, &[1000.0, 960.0, 540.0])
            .unwrap();
        assert_eq!(id, 5);
        assert_eq!(repo.count().unwrap(), 1);

        let camera = repo.find_by_id(5).unwrap();
        assert_eq!(camera.model, 0);
        assert_eq!((camera.width, camera.height), (1920, 1080));
        assert_eq!(camera.params, vec![1000.0, 960.0, 540.0]);
        assert!(!camera.prior_focal_length);
    }

    #[test]
    fn test_upsert_twice_keeps_one_row() {
        let (_dir, store) = setup_test_db();

        store
            .upsert_camera(Some(5), 0, 640, 480, &[1.0, 2.0, 3.0])
            .unwrap();
        store
            .upsert_camera(Some(5), 2, 1280, 720, &[4.0, 5.0, 6.0, 0.1])
            .unwrap();

        let cameras = store.list_cameras().unwrap();
        assert_eq!(cameras.len(), 1);
        assert_eq!(cameras[0].camera_id, 5);
        assert_eq!(cameras[0].model, 2);
        assert_eq!(cameras[0].params, vec![4.0, 5.0, 6.0, 0.1]);
        assert!(!cameras[0].prior_focal_length);
    }

    #[test]
    fn test_upsert_without_id_auto_assigns() {
        let (_dir, store) = setup_test_db();

        let first = store.upsert_camera(None, 0, 10, 10, &[1.0]).unwrap();
        let second = store.upsert_camera(None, 0, 10, 10, &[2.0]).unwrap();

        assert_ne!(first, second);
        assert_eq!(store.get_camera(second).unwrap().params, vec![2.0]);
    }

    #[test]
    fn test_add_duplicate_id_is_constraint_violation() {
        let (_dir, store) = setup_test_db();
        let camera = NewCamera {
            camera_id: Some(1),
            model: 0,
            width: 100,
            height: 100,
            params: vec![50.0, 50.0, 50.0],
            prior_focal_length: false,
        };

        store.cameras().add(&camera).unwrap();
        let err = store.cameras().add(&camera).unwrap_err();
        assert!(err.is_constraint());
    }

    #[test]
    fn test_update_missing_camera_matches_nothing() {
        let (_dir, store) = setup_test_db();
        assert!(!store.cameras().update(9, 0, 1, 1, &[1.0]).unwrap());
        assert_eq!(store.cameras().count().unwrap(), 0);
    }

    #[test]
    fn test_get_missing_camera_is_not_found() {
        let (_dir, store) = setup_test_db();

        let err = store.get_camera(42).unwrap_err();
        assert!(matches!(
            err,
            DatabaseError::NotFound {
                entity: "camera",
                id: 42
            }
        ));
    }

    #[test]
    fn test_delete_camera() {
        let (_dir, store) = setup_test_db();
        store.upsert_camera(Some(3), 0, 1, 1, &[1.0]).unwrap();

        assert!(store.cameras().exists(3).unwrap());
        assert!(store.cameras().delete(3).unwrap());
        assert!(!store.cameras().exists(3).unwrap());
        assert!(!store.cameras().delete(3).unwrap());
    }
}

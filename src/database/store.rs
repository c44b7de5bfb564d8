use super::models::Camera;
use super::repositories::{
    CameraRepository, FeatureRepository, ImageRepository, MatchRepository,
};
use super::schema::{
    CREATE_ALL, CREATE_CAMERAS_TABLE, CREATE_DESCRIPTORS_TABLE, CREATE_IMAGES_TABLE,
    CREATE_KEYPOINTS_TABLE, CREATE_MATCHES_TABLE, CREATE_NAME_INDEX, CREATE_POSE_PRIORS_TABLE,
    CREATE_TWO_VIEW_GEOMETRIES_TABLE,
};
use super::{DatabaseError, Result};
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};

/// Handle on the reconstruction tool's database file.
///
/// Writes open an implicit transaction that stays open until [`commit`].
/// Dropping or closing the store without committing discards those writes.
///
/// [`commit`]: ReconstructionStore::commit
pub struct ReconstructionStore {
    conn: Connection,
    path: PathBuf,
}

impl ReconstructionStore {
    pub fn open_or_create(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_flags(path.as_ref(), OpenFlags::default())
    }

    /// Open a database that must already exist. A missing file is an
    /// `Open` error rather than a new empty database.
    pub fn open_existing(path: impl AsRef<Path>) -> Result<Self> {
        let mut flags = OpenFlags::default();
        flags.remove(OpenFlags::SQLITE_OPEN_CREATE);
        Self::open_with_flags(path.as_ref(), flags)
    }

    fn open_with_flags(path: &Path, flags: OpenFlags) -> Result<Self> {
        let path = path.to_path_buf();
        let conn =
            Connection::open_with_flags(&path, flags).map_err(|source| DatabaseError::Open {
                path: path.clone(),
                source,
            })?;

        // SQLite leaves foreign keys off per connection unless asked.
        conn.pragma_update(None, "foreign_keys", true)
            .map_err(|source| DatabaseError::Open {
                path: path.clone(),
                source,
            })?;

        log::debug!("Opened reconstruction database {}", path.display());
        Ok(Self { conn, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn create_schema(&self) -> Result<()> {
        for statement in CREATE_ALL {
            self.conn.execute_batch(statement)?;
        }
        Ok(())
    }

    pub fn create_cameras_table(&self) -> Result<()> {
        self.conn.execute_batch(CREATE_CAMERAS_TABLE)?;
        Ok(())
    }

    pub fn create_images_table(&self) -> Result<()> {
        self.conn.execute_batch(CREATE_IMAGES_TABLE)?;
        Ok(())
    }

    pub fn create_pose_priors_table(&self) -> Result<()> {
        self.conn.execute_batch(CREATE_POSE_PRIORS_TABLE)?;
        Ok(())
    }

    pub fn create_keypoints_table(&self) -> Result<()> {
        self.conn.execute_batch(CREATE_KEYPOINTS_TABLE)?;
        Ok(())
    }

    pub fn create_descriptors_table(&self) -> Result<()> {
        self.conn.execute_batch(CREATE_DESCRIPTORS_TABLE)?;
        Ok(())
    }

    pub fn create_matches_table(&self) -> Result<()> {
        self.conn.execute_batch(CREATE_MATCHES_TABLE)?;
        Ok(())
    }

    pub fn create_two_view_geometries_table(&self) -> Result<()> {
        self.conn.execute_batch(CREATE_TWO_VIEW_GEOMETRIES_TABLE)?;
        Ok(())
    }

    pub fn create_name_index(&self) -> Result<()> {
        self.conn.execute_batch(CREATE_NAME_INDEX)?;
        Ok(())
    }

    /// User tables, sorted by name.
    pub fn table_names(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names)
    }

    pub fn index_names(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'index' AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names)
    }

    pub fn cameras(&self) -> CameraRepository<'_> {
        CameraRepository::new(&self.conn)
    }

    pub fn images(&self) -> ImageRepository<'_> {
        ImageRepository::new(&self.conn)
    }

    pub fn features(&self) -> FeatureRepository<'_> {
        FeatureRepository::new(&self.conn)
    }

    pub fn matches(&self) -> MatchRepository<'_> {
        MatchRepository::new(&self.conn)
    }

    pub fn upsert_camera(
        &self,
        camera_id: Option<i64>,
        model: i32,
        width: u32,
        height: u32,
        params: &[f64],
    ) -> Result<i64> {
        self.cameras()
            .upsert(camera_id, model, width, height, params)
    }

    pub fn get_camera(&self, camera_id: i64) -> Result<Camera> {
        self.cameras().find_by_id(camera_id)
    }

    pub fn list_cameras(&self) -> Result<Vec<Camera>> {
        self.cameras().find_all()
    }

    pub fn has_pending_writes(&self) -> bool {
        !self.conn.is_autocommit()
    }

    pub fn commit(&self) -> Result<()> {
        if self.has_pending_writes() {
            self.conn.execute_batch("COMMIT")?;
            log::debug!("Committed {}", self.path.display());
        }
        Ok(())
    }

    pub fn rollback(&self) -> Result<()> {
        if self.has_pending_writes() {
            self.conn.execute_batch("ROLLBACK")?;
        }
        Ok(())
    }

    /// Release the database, reporting any close failure. Uncommitted
    /// writes are discarded.
    pub fn close(self) -> Result<()> {
        if self.has_pending_writes() {
            log::warn!(
                "Closing {} with uncommitted writes; they will be discarded",
                self.path.display()
            );
        }
        self.conn.close().map_err(|(_, err)| DatabaseError::from(err))
    }

    #[cfg(test)]
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }
}

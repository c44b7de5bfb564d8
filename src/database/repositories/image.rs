use super::{Repository, Result};
use crate::database::models::Image;
use crate::database::DatabaseError;
use rusqlite::{params, Connection, OptionalExtension, Row};

pub struct ImageRepository<'a> {
    conn: &'a Connection,
}

impl Repository for ImageRepository<'_> {
    fn connection(&self) -> &Connection {
        self.conn
    }
}

fn image_from_row(row: &Row<'_>) -> rusqlite::Result<Image> {
    Ok(Image {
        image_id: row.get(0)?,
        name: row.get(1)?,
        camera_id: row.get(2)?,
    })
}

impl<'a> ImageRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Insert an image. The id range, name uniqueness and camera
    /// reference are enforced by the table and surface as constraint
    /// violations.
    pub fn add(&self, name: &str, camera_id: i64, image_id: Option<i64>) -> Result<i64> {
        let conn = self.writer()?;
        conn.execute(
            "INSERT INTO images (image_id, name, camera_id) VALUES (?1, ?2, ?3)",
            params![image_id, name, camera_id],
        )?;
        Ok(image_id.unwrap_or_else(|| conn.last_insert_rowid()))
    }

    pub fn find_by_id(&self, image_id: i64) -> Result<Image> {
        self.conn
            .query_row(
                "SELECT image_id, name, camera_id FROM images WHERE image_id = ?1",
                params![image_id],
                image_from_row,
            )
            .optional()?
            .ok_or(DatabaseError::NotFound {
                entity: "image",
                id: image_id,
            })
    }

    pub fn find_by_name(&self, name: &str) -> Result<Option<Image>> {
        let image = self
            .conn
            .query_row(
                "SELECT image_id, name, camera_id FROM images WHERE name = ?1",
                params![name],
                image_from_row,
            )
            .optional()?;
        Ok(image)
    }

    pub fn find_all(&self) -> Result<Vec<Image>> {
        let mut stmt = self
            .conn
            .prepare("SELECT image_id, name, camera_id FROM images")?;
        let images = stmt
            .query_map([], image_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(images)
    }

    pub fn find_by_camera_id(&self, camera_id: i64) -> Result<Vec<Image>> {
        let mut stmt = self
            .conn
            .prepare("SELECT image_id, name, camera_id FROM images WHERE camera_id = ?1")?;
        let images = stmt
            .query_map(params![camera_id], image_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(images)
    }

    /// Removes the image together with its pose prior, keypoints and
    /// descriptors.
    pub fn delete(&self, image_id: i64) -> Result<bool> {
        let deleted = self
            .writer()?
            .execute("DELETE FROM images WHERE image_id = ?1", params![image_id])?;
        Ok(deleted > 0)
    }

    pub fn count(&self) -> Result<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM images", [], |row| row.get(0))?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use crate::database::schema::MAX_IMAGE_ID;
    use crate::database::ReconstructionStore;
    use tempfile::{tempdir, TempDir};

    fn setup_test_db() -> (TempDir, ReconstructionStore) {
        let temp_dir = tempdir().unwrap();
        let store = ReconstructionStore::open_or_create(temp_dir.path().join("test.db")).unwrap();
        store.create_schema().unwrap();
        store
            .upsert_camera(Some(1), 0, 1920, 1080, &[1000.0, 960.0, 540.0])
            .unwrap();
        (temp_dir, store)
    }

    #[test]
    fn test_add_and_find_image() {
        let (_dir, store) = setup_test_db();
        let repo = store.images();

        let id = repo.add("IMG_0001.jpg", 1, None).unwrap();
        let image = repo.find_by_id(id).unwrap();
        assert_eq!(image.name, "IMG_0001.jpg");
        assert_eq!(image.camera_id, 1);

        let by_name = repo.find_by_name("IMG_0001.jpg").unwrap().unwrap();
        assert_eq!(by_name, image);
        assert!(repo.find_by_name("missing.jpg").unwrap().is_none());
        assert_eq!(repo.find_by_camera_id(1).unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_camera_is_rejected() {
        let (_dir, store) = setup_test_db();

        let err = store.images().add("IMG_0001.jpg", 99, None).unwrap_err();
        assert!(err.is_constraint());
        assert_eq!(store.images().count().unwrap(), 0);
    }

    #[test]
    fn test_duplicate_name_is_rejected() {
        let (_dir, store) = setup_test_db();

        store.images().add("a.jpg", 1, None).unwrap();
        let err = store.images().add("a.jpg", 1, None).unwrap_err();
        assert!(err.is_constraint());
    }

    #[test]
    fn test_image_id_upper_bound() {
        let (_dir, store) = setup_test_db();

        let err = store
            .images()
            .add("too_big.jpg", 1, Some(MAX_IMAGE_ID))
            .unwrap_err();
        assert!(err.is_constraint());

        let id = store
            .images()
            .add("largest.jpg", 1, Some(MAX_IMAGE_ID - 1))
            .unwrap();
        assert_eq!(id, MAX_IMAGE_ID - 1);
    }

    #[test]
    fn test_negative_image_id_is_rejected() {
        let (_dir, store) = setup_test_db();
        assert!(store
            .images()
            .add("neg.jpg", 1, Some(-1))
            .unwrap_err()
            .is_constraint());
    }

    #[test]
    fn test_referenced_camera_cannot_be_deleted() {
        let (_dir, store) = setup_test_db();
        store.images().add("a.jpg", 1, None).unwrap();

        let err = store.cameras().delete(1).unwrap_err();
        assert!(err.is_constraint());
        assert!(store.cameras().exists(1).unwrap());

        assert!(store.images().delete(1).unwrap());
        assert!(store.cameras().delete(1).unwrap());
    }

    #[test]
    fn test_missing_image_is_not_found() {
        let (_dir, store) = setup_test_db();
        assert!(store.images().find_by_id(7).unwrap_err().is_not_found());
    }
}

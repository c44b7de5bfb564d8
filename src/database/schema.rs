//! Table definitions shared with the external reconstruction tool.
//!
//! Column names, types, and the image id bound are read by the tool
//! itself, so these statements must stay byte-compatible with its own
//! database layout.

/// Exclusive upper bound on image ids; also the pair id multiplier.
pub const MAX_IMAGE_ID: i64 = 2_147_483_647;

pub const CREATE_CAMERAS_TABLE: &str = "CREATE TABLE IF NOT EXISTS cameras (
    camera_id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    model INTEGER NOT NULL,
    width INTEGER NOT NULL,
    height INTEGER NOT NULL,
    params BLOB,
    prior_focal_length INTEGER NOT NULL)";

// The CHECK bound must equal MAX_IMAGE_ID.
pub const CREATE_IMAGES_TABLE: &str = "CREATE TABLE IF NOT EXISTS images (
    image_id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    name TEXT NOT NULL UNIQUE,
    camera_id INTEGER NOT NULL,
    CONSTRAINT image_id_check CHECK(image_id >= 0 and image_id < 2147483647),
    FOREIGN KEY(camera_id) REFERENCES cameras(camera_id))";

pub const CREATE_POSE_PRIORS_TABLE: &str = "CREATE TABLE IF NOT EXISTS pose_priors (
    image_id INTEGER PRIMARY KEY NOT NULL,
    position BLOB,
    coordinate_system INTEGER NOT NULL,
    position_covariance BLOB,
    FOREIGN KEY(image_id) REFERENCES images(image_id) ON DELETE CASCADE)";

pub const CREATE_KEYPOINTS_TABLE: &str = "CREATE TABLE IF NOT EXISTS keypoints (
    image_id INTEGER PRIMARY KEY NOT NULL,
    rows INTEGER NOT NULL,
    cols INTEGER NOT NULL,
    data BLOB,
    FOREIGN KEY(image_id) REFERENCES images(image_id) ON DELETE CASCADE)";

pub const CREATE_DESCRIPTORS_TABLE: &str = "CREATE TABLE IF NOT EXISTS descriptors (
    image_id INTEGER PRIMARY KEY NOT NULL,
    rows INTEGER NOT NULL,
    cols INTEGER NOT NULL,
    data BLOB,
    FOREIGN KEY(image_id) REFERENCES images(image_id) ON DELETE CASCADE)";

pub const CREATE_MATCHES_TABLE: &str = "CREATE TABLE IF NOT EXISTS matches (
    pair_id INTEGER PRIMARY KEY NOT NULL,
    rows INTEGER NOT NULL,
    cols INTEGER NOT NULL,
    data BLOB)";

pub const CREATE_TWO_VIEW_GEOMETRIES_TABLE: &str =
    "CREATE TABLE IF NOT EXISTS two_view_geometries (
    pair_id INTEGER PRIMARY KEY NOT NULL,
    rows INTEGER NOT NULL,
    cols INTEGER NOT NULL,
    data BLOB,
    config INTEGER NOT NULL,
    F BLOB,
    E BLOB,
    H BLOB,
    qvec BLOB,
    tvec BLOB)";

pub const CREATE_NAME_INDEX: &str =
    "CREATE UNIQUE INDEX IF NOT EXISTS index_name ON images(name)";

/// Creation order respects foreign keys: cameras before images before
/// the per-image tables.
pub const CREATE_ALL: [&str; 8] = [
    CREATE_CAMERAS_TABLE,
    CREATE_IMAGES_TABLE,
    CREATE_POSE_PRIORS_TABLE,
    CREATE_KEYPOINTS_TABLE,
    CREATE_DESCRIPTORS_TABLE,
    CREATE_MATCHES_TABLE,
    CREATE_TWO_VIEW_GEOMETRIES_TABLE,
    CREATE_NAME_INDEX,
];

pub const TABLE_NAMES: [&str; 7] = [
    "cameras",
    "images",
    "pose_priors",
    "keypoints",
    "descriptors",
    "matches",
    "two_view_geometries",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_check_uses_max_image_id() {
        let bound = format!("image_id < {}", MAX_IMAGE_ID);
        assert!(CREATE_IMAGES_TABLE.contains(&bound));
    }

    #[test]
    fn test_every_table_has_a_create_statement() {
        for table in TABLE_NAMES {
            let needle = format!("CREATE TABLE IF NOT EXISTS {} (", table);
            assert!(
                CREATE_ALL.iter().any(|sql| sql.contains(&needle)),
                "missing {}",
                table
            );
        }
    }
}

pub mod camera;
pub mod feature;
pub mod image;
pub mod matching;

pub use camera::CameraRepository;
pub use feature::FeatureRepository;
pub use image::ImageRepository;
pub use matching::MatchRepository;

use super::Result;
use crate::blob::{self, Dim, Element};
use rusqlite::Connection;

pub trait Repository {
    fn connection(&self) -> &Connection;

    /// Connection for a mutating statement. Opens the store's implicit
    /// transaction if none is active.
    fn writer(&self) -> Result<&Connection> {
        let conn = self.connection();
        if conn.is_autocommit() {
            conn.execute_batch("BEGIN")?;
        }
        Ok(conn)
    }
}

/// Decode a nullable blob holding exactly `N` elements.
pub(crate) fn decode_fixed<T: Element, const N: usize>(
    bytes: Option<Vec<u8>>,
) -> Result<Option<[T; N]>> {
    match bytes {
        None => Ok(None),
        Some(bytes) => {
            let values = blob::decode::<T>(&bytes, &[Dim::Fixed(N)])?.into_vec();
            let mut out = [T::zeroed(); N];
            out.copy_from_slice(&values);
            Ok(Some(out))
        }
    }
}

pub(crate) fn encode_fixed<T: Element, const N: usize>(values: Option<&[T; N]>) -> Option<Vec<u8>> {
    values.map(|v| blob::encode_slice(v.as_slice()))
}

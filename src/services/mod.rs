pub mod camera_import;
pub mod colmap;
pub mod history;

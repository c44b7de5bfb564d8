use crate::blob::Array;
use crate::database::schema::MAX_IMAGE_ID;
use serde::{Deserialize, Serialize};

// Camera models
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    pub camera_id: i64,
    pub model: i32,
    pub width: u32,
    pub height: u32,
    pub params: Vec<f64>,
    pub prior_focal_length: bool,
}

impl Camera {
    pub fn model_kind(&self) -> Option<CameraModel> {
        CameraModel::from_id(self.model)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewCamera {
    pub camera_id: Option<i64>,
    pub model: i32,
    pub width: u32,
    pub height: u32,
    pub params: Vec<f64>,
    pub prior_focal_length: bool,
}

// Image models
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub image_id: i64,
    pub name: String,
    pub camera_id: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PosePrior {
    pub image_id: i64,
    pub position: [f64; 3],
    pub coordinate_system: CoordinateSystem,
    /// Row-major 3x3.
    pub position_covariance: Option<[f64; 9]>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Keypoints {
    pub image_id: i64,
    pub data: Array<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Descriptors {
    pub image_id: i64,
    pub data: Array<u8>,
}

// Pair models
#[derive(Debug, Clone, PartialEq)]
pub struct Matches {
    pub pair_id: i64,
    pub data: Array<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TwoViewGeometry {
    pub pair_id: i64,
    pub matches: Array<u32>,
    pub config: TwoViewGeometryConfig,
    pub f: Option<[f64; 9]>,
    pub e: Option<[f64; 9]>,
    pub h: Option<[f64; 9]>,
    pub qvec: Option<[f64; 4]>,
    pub tvec: Option<[f64; 3]>,
}

impl TwoViewGeometry {
    /// An inlier-only geometry with no estimated matrices or pose.
    pub fn new(matches: Array<u32>, config: TwoViewGeometryConfig) -> Self {
        Self {
            pair_id: 0,
            matches,
            config,
            f: None,
            e: None,
            h: None,
            qvec: None,
            tvec: None,
        }
    }
}

/// Calibration models understood by the external tool, keyed by its ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CameraModel {
    SimplePinhole,
    Pinhole,
    SimpleRadial,
    Radial,
    OpenCv,
    OpenCvFisheye,
    FullOpenCv,
    Fov,
    SimpleRadialFisheye,
    RadialFisheye,
    ThinPrismFisheye,
}

impl CameraModel {
    pub const ALL: [CameraModel; 11] = [
        CameraModel::SimplePinhole,
        CameraModel::Pinhole,
        CameraModel::SimpleRadial,
        CameraModel::Radial,
        CameraModel::OpenCv,
        CameraModel::OpenCvFisheye,
        CameraModel::FullOpenCv,
        CameraModel::Fov,
        CameraModel::SimpleRadialFisheye,
        CameraModel::RadialFisheye,
        CameraModel::ThinPrismFisheye,
    ];

    pub fn id(self) -> i32 {
        match self {
            CameraModel::SimplePinhole => 0,
            CameraModel::Pinhole => 1,
            CameraModel::SimpleRadial => 2,
            CameraModel::Radial => 3,
            CameraModel::OpenCv => 4,
            CameraModel::OpenCvFisheye => 5,
            CameraModel::FullOpenCv => 6,
            CameraModel::Fov => 7,
            CameraModel::SimpleRadialFisheye => 8,
            CameraModel::RadialFisheye => 9,
            CameraModel::ThinPrismFisheye => 10,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CameraModel::SimplePinhole => "SIMPLE_PINHOLE",
            CameraModel::Pinhole => "PINHOLE",
            CameraModel::SimpleRadial => "SIMPLE_RADIAL",
            CameraModel::Radial => "RADIAL",
            CameraModel::OpenCv => "OPENCV",
            CameraModel::OpenCvFisheye => "OPENCV_FISHEYE",
            CameraModel::FullOpenCv => "FULL_OPENCV",
            CameraModel::Fov => "FOV",
            CameraModel::SimpleRadialFisheye => "SIMPLE_RADIAL_FISHEYE",
            CameraModel::RadialFisheye => "RADIAL_FISHEYE",
            CameraModel::ThinPrismFisheye => "THIN_PRISM_FISHEYE",
        }
    }

    pub fn num_params(self) -> usize {
        match self {
            CameraModel::SimplePinhole => 3,
            CameraModel::Pinhole | CameraModel::SimpleRadial => 4,
            CameraModel::SimpleRadialFisheye => 4,
            CameraModel::Radial | CameraModel::Fov | CameraModel::RadialFisheye => 5,
            CameraModel::OpenCv | CameraModel::OpenCvFisheye => 8,
            CameraModel::FullOpenCv | CameraModel::ThinPrismFisheye => 12,
        }
    }

    pub fn from_id(id: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.id() == id)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinateSystem {
    Undefined,
    Wgs84,
    Cartesian,
}

impl From<i32> for CoordinateSystem {
    fn from(id: i32) -> Self {
        match id {
            0 => CoordinateSystem::Wgs84,
            1 => CoordinateSystem::Cartesian,
            _ => CoordinateSystem::Undefined,
        }
    }
}

impl From<CoordinateSystem> for i32 {
    fn from(system: CoordinateSystem) -> Self {
        match system {
            CoordinateSystem::Undefined => -1,
            CoordinateSystem::Wgs84 => 0,
            CoordinateSystem::Cartesian => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TwoViewGeometryConfig {
    Undefined,
    Degenerate,
    Calibrated,
    Uncalibrated,
    Planar,
    Panoramic,
    PlanarOrPanoramic,
    Watermark,
    Multiple,
}

impl From<i32> for TwoViewGeometryConfig {
    fn from(id: i32) -> Self {
        match id {
            1 => TwoViewGeometryConfig::Degenerate,
            2 => TwoViewGeometryConfig::Calibrated,
            3 => TwoViewGeometryConfig::Uncalibrated,
            4 => TwoViewGeometryConfig::Planar,
            5 => TwoViewGeometryConfig::Panoramic,
            6 => TwoViewGeometryConfig::PlanarOrPanoramic,
            7 => TwoViewGeometryConfig::Watermark,
            8 => TwoViewGeometryConfig::Multiple,
            _ => TwoViewGeometryConfig::Undefined,
        }
    }
}

impl From<TwoViewGeometryConfig> for i32 {
    fn from(config: TwoViewGeometryConfig) -> Self {
        match config {
            TwoViewGeometryConfig::Undefined => 0,
            TwoViewGeometryConfig::Degenerate => 1,
            TwoViewGeometryConfig::Calibrated => 2,
            TwoViewGeometryConfig::Uncalibrated => 3,
            TwoViewGeometryConfig::Planar => 4,
            TwoViewGeometryConfig::Panoramic => 5,
            TwoViewGeometryConfig::PlanarOrPanoramic => 6,
            TwoViewGeometryConfig::Watermark => 7,
            TwoViewGeometryConfig::Multiple => 8,
        }
    }
}

/// Order-independent key for a pair of images.
pub fn image_ids_to_pair_id(image_id1: i64, image_id2: i64) -> i64 {
    let (low, high) = if image_id1 > image_id2 {
        (image_id2, image_id1)
    } else {
        (image_id1, image_id2)
    };
    low * MAX_IMAGE_ID + high
}

/// Inverse of [`image_ids_to_pair_id`]; the smaller id comes first.
pub fn pair_id_to_image_ids(pair_id: i64) -> (i64, i64) {
    let image_id2 = pair_id % MAX_IMAGE_ID;
    let image_id1 = (pair_id - image_id2) / MAX_IMAGE_ID;
    (image_id1, image_id2)
}

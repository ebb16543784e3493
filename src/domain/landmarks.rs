//! Pose landmark model
//!
//! Landmarks follow the 33-point MediaPipe pose topology. Coordinates are
//! normalized to the frame (x, y in [0, 1], y grows downwards) and carry a
//! visibility score reported by the extractor.

use serde::{Deserialize, Serialize};

pub const BODY_POINT_COUNT: usize = 33;

/// Named body point, indexed in extractor order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum BodyPoint {
    Nose = 0,
    LeftEyeInner,
    LeftEye,
    LeftEyeOuter,
    RightEyeInner,
    RightEye,
    RightEyeOuter,
    LeftEar,
    RightEar,
    MouthLeft,
    MouthRight,
    LeftShoulder,
    RightShoulder,
    LeftElbow,
    RightElbow,
    LeftWrist,
    RightWrist,
    LeftPinky,
    RightPinky,
    LeftIndex,
    RightIndex,
    LeftThumb,
    RightThumb,
    LeftHip,
    RightHip,
    LeftKnee,
    RightKnee,
    LeftAnkle,
    RightAnkle,
    LeftHeel,
    RightHeel,
    LeftFootIndex,
    RightFootIndex,
}

impl BodyPoint {
    pub const ALL: [BodyPoint; BODY_POINT_COUNT] = [
        BodyPoint::Nose,
        BodyPoint::LeftEyeInner,
        BodyPoint::LeftEye,
        BodyPoint::LeftEyeOuter,
        BodyPoint::RightEyeInner,
        BodyPoint::RightEye,
        BodyPoint::RightEyeOuter,
        BodyPoint::LeftEar,
        BodyPoint::RightEar,
        BodyPoint::MouthLeft,
        BodyPoint::MouthRight,
        BodyPoint::LeftShoulder,
        BodyPoint::RightShoulder,
        BodyPoint::LeftElbow,
        BodyPoint::RightElbow,
        BodyPoint::LeftWrist,
        BodyPoint::RightWrist,
        BodyPoint::LeftPinky,
        BodyPoint::RightPinky,
        BodyPoint::LeftIndex,
        BodyPoint::RightIndex,
        BodyPoint::LeftThumb,
        BodyPoint::RightThumb,
        BodyPoint::LeftHip,
        BodyPoint::RightHip,
        BodyPoint::LeftKnee,
        BodyPoint::RightKnee,
        BodyPoint::LeftAnkle,
        BodyPoint::RightAnkle,
        BodyPoint::LeftHeel,
        BodyPoint::RightHeel,
        BodyPoint::LeftFootIndex,
        BodyPoint::RightFootIndex,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BodyPoint::Nose => "nose",
            BodyPoint::LeftEyeInner => "left_eye_inner",
            BodyPoint::LeftEye => "left_eye",
            BodyPoint::LeftEyeOuter => "left_eye_outer",
            BodyPoint::RightEyeInner => "right_eye_inner",
            BodyPoint::RightEye => "right_eye",
            BodyPoint::RightEyeOuter => "right_eye_outer",
            BodyPoint::LeftEar => "left_ear",
            BodyPoint::RightEar => "right_ear",
            BodyPoint::MouthLeft => "mouth_left",
            BodyPoint::MouthRight => "mouth_right",
            BodyPoint::LeftShoulder => "left_shoulder",
            BodyPoint::RightShoulder => "right_shoulder",
            BodyPoint::LeftElbow => "left_elbow",
            BodyPoint::RightElbow => "right_elbow",
            BodyPoint::LeftWrist => "left_wrist",
            BodyPoint::RightWrist => "right_wrist",
            BodyPoint::LeftPinky => "left_pinky",
            BodyPoint::RightPinky => "right_pinky",
            BodyPoint::LeftIndex => "left_index",
            BodyPoint::RightIndex => "right_index",
            BodyPoint::LeftThumb => "left_thumb",
            BodyPoint::RightThumb => "right_thumb",
            BodyPoint::LeftHip => "left_hip",
            BodyPoint::RightHip => "right_hip",
            BodyPoint::LeftKnee => "left_knee",
            BodyPoint::RightKnee => "right_knee",
            BodyPoint::LeftAnkle => "left_ankle",
            BodyPoint::RightAnkle => "right_ankle",
            BodyPoint::LeftHeel => "left_heel",
            BodyPoint::RightHeel => "right_heel",
            BodyPoint::LeftFootIndex => "left_foot_index",
            BodyPoint::RightFootIndex => "right_foot_index",
        }
    }
}

fn default_visibility() -> f32 {
    1.0
}

/// A single normalized landmark
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    #[serde(default = "default_visibility")]
    pub visibility: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y, visibility: 1.0 }
    }

    pub fn with_visibility(mut self, visibility: f32) -> Self {
        self.visibility = visibility;
        self
    }
}

/// Landmarks detected for one subject in one frame
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkSet {
    points: [Option<Landmark>; BODY_POINT_COUNT],
}

impl Default for LandmarkSet {
    fn default() -> Self {
        Self::new()
    }
}

impl LandmarkSet {
    pub fn new() -> Self {
        Self { points: [None; BODY_POINT_COUNT] }
    }

    /// Build a set from landmarks listed in extractor order.
    /// Entries past the known topology are ignored.
    pub fn from_ordered<I>(landmarks: I) -> Self
    where
        I: IntoIterator<Item = Landmark>,
    {
        let mut set = Self::new();
        for (i, lm) in landmarks.into_iter().take(BODY_POINT_COUNT).enumerate() {
            set.points[i] = Some(lm);
        }
        set
    }

    /// Builder-style setter
    pub fn with(mut self, point: BodyPoint, landmark: Landmark) -> Self {
        self.set(point, landmark);
        self
    }

    pub fn set(&mut self, point: BodyPoint, landmark: Landmark) {
        self.points[point.index()] = Some(landmark);
    }

    #[inline]
    pub fn get(&self, point: BodyPoint) -> Option<Landmark> {
        self.points[point.index()]
    }

    /// Number of points present
    pub fn len(&self) -> usize {
        self.points.iter().filter(|p| p.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_point_index_roundtrip() {
        for (i, point) in BodyPoint::ALL.iter().enumerate() {
            assert_eq!(point.index(), i);
            assert_eq!(BodyPoint::from_index(i), Some(*point));
        }
        assert_eq!(BodyPoint::from_index(BODY_POINT_COUNT), None);
        assert_eq!(BodyPoint::LeftShoulder.index(), 11);
        assert_eq!(BodyPoint::RightShoulder.index(), 12);
    }

    #[test]
    fn test_from_ordered_truncates() {
        let set = LandmarkSet::from_ordered((0..40).map(|i| Landmark::new(i as f32 / 40.0, 0.5)));
        assert_eq!(set.len(), BODY_POINT_COUNT);
        assert_eq!(set.get(BodyPoint::Nose), Some(Landmark::new(0.0, 0.5)));
    }

    #[test]
    fn test_landmark_visibility_defaults_to_one() {
        let lm: Landmark = serde_json::from_str(r#"{"x":0.2,"y":0.3}"#).unwrap();
        assert_eq!(lm.visibility, 1.0);
    }
}

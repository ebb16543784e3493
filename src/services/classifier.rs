//! Sleep posture classification from pose landmarks
//!
//! Pure geometry over normalized coordinates, evaluated in priority order:
//! 1. Missing or low-confidence key points -> Unknown
//! 2. Shoulders compressed horizontally -> Tummy (face down) or Side
//! 3. Eyes compressed horizontally -> Side
//! 4. Otherwise -> Safe
//!
//! All comparisons are strict, so a distance equal to its threshold never
//! triggers the rule.

use crate::domain::landmarks::{BodyPoint, Landmark, LandmarkSet};
use crate::domain::types::PostureLabel;
use crate::infra::config::ClassifierConfig;

/// Tunable thresholds, copied out of config once at startup
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PostureThresholds {
    pub shoulder: f32,
    pub eye: f32,
    pub face: f32,
    pub min_visibility: f32,
    pub face_down_refinement: bool,
}

impl PostureThresholds {
    pub fn from_config(config: &ClassifierConfig) -> Self {
        Self {
            shoulder: config.shoulder_threshold,
            eye: config.eye_threshold,
            face: config.face_threshold,
            min_visibility: config.min_visibility,
            face_down_refinement: config.face_down_refinement,
        }
    }
}

impl Default for PostureThresholds {
    fn default() -> Self {
        Self::from_config(&ClassifierConfig::default())
    }
}

/// Key points the classifier reads, all present and confident
struct KeyPoints {
    nose: Landmark,
    left_eye: Landmark,
    right_eye: Landmark,
    left_shoulder: Landmark,
    right_shoulder: Landmark,
}

impl KeyPoints {
    fn extract(landmarks: &LandmarkSet, min_visibility: f32) -> Option<Self> {
        let confident = |point: BodyPoint| {
            landmarks.get(point).filter(|lm| lm.visibility >= min_visibility)
        };

        Some(Self {
            nose: confident(BodyPoint::Nose)?,
            left_eye: confident(BodyPoint::LeftEye)?,
            right_eye: confident(BodyPoint::RightEye)?,
            left_shoulder: confident(BodyPoint::LeftShoulder)?,
            right_shoulder: confident(BodyPoint::RightShoulder)?,
        })
    }

    /// Nose centred between the shoulders and lower in the image than both
    fn is_face_down(&self, face_threshold: f32) -> bool {
        let mid_x = (self.left_shoulder.x + self.right_shoulder.x) / 2.0;
        (self.nose.x - mid_x).abs() < face_threshold
            && self.nose.y > self.left_shoulder.y
            && self.nose.y > self.right_shoulder.y
    }
}

/// Classify one frame's landmarks into a posture label
pub fn classify(landmarks: Option<&LandmarkSet>, thresholds: &PostureThresholds) -> PostureLabel {
    let Some(landmarks) = landmarks else {
        return PostureLabel::Unknown;
    };
    let Some(kp) = KeyPoints::extract(landmarks, thresholds.min_visibility) else {
        return PostureLabel::Unknown;
    };

    let shoulder_dx = (kp.left_shoulder.x - kp.right_shoulder.x).abs();
    if shoulder_dx < thresholds.shoulder {
        if !thresholds.face_down_refinement || kp.is_face_down(thresholds.face) {
            return PostureLabel::Tummy;
        }
        return PostureLabel::Side;
    }

    let eye_dx = (kp.left_eye.x - kp.right_eye.x).abs();
    if eye_dx < thresholds.eye {
        return PostureLabel::Side;
    }

    PostureLabel::Safe
}

#[cfg(test)]
mod tests {
    use super::*;

    fn landmarks(
        nose: (f32, f32),
        eyes: (f32, f32),
        shoulders: (f32, f32),
        shoulder_y: f32,
    ) -> LandmarkSet {
        LandmarkSet::new()
            .with(BodyPoint::Nose, Landmark::new(nose.0, nose.1))
            .with(BodyPoint::LeftEye, Landmark::new(eyes.0, 0.3))
            .with(BodyPoint::RightEye, Landmark::new(eyes.1, 0.3))
            .with(BodyPoint::LeftShoulder, Landmark::new(shoulders.0, shoulder_y))
            .with(BodyPoint::RightShoulder, Landmark::new(shoulders.1, shoulder_y))
    }

    #[test]
    fn test_absent_landmarks_are_unknown() {
        let thresholds = PostureThresholds::default();
        assert_eq!(classify(None, &thresholds), PostureLabel::Unknown);
        assert_eq!(classify(None, &thresholds), PostureLabel::Unknown);
        assert_eq!(classify(Some(&LandmarkSet::new()), &thresholds), PostureLabel::Unknown);
    }

    #[test]
    fn test_low_visibility_is_unknown() {
        let thresholds = PostureThresholds::default();
        let mut set = landmarks((0.5, 0.3), (0.4, 0.6), (0.2, 0.8), 0.5);
        set.set(BodyPoint::LeftShoulder, Landmark::new(0.2, 0.5).with_visibility(0.1));
        assert_eq!(classify(Some(&set), &thresholds), PostureLabel::Unknown);
    }

    #[test]
    fn test_wide_shoulders_and_eyes_is_safe() {
        let set = landmarks((0.5, 0.3), (0.4, 0.6), (0.2, 0.8), 0.5);
        assert_eq!(classify(Some(&set), &PostureThresholds::default()), PostureLabel::Safe);
    }

    #[test]
    fn test_close_eyes_with_wide_shoulders_is_side() {
        let set = landmarks((0.5, 0.3), (0.48, 0.52), (0.2, 0.8), 0.5);
        assert_eq!(classify(Some(&set), &PostureThresholds::default()), PostureLabel::Side);
    }

    #[test]
    fn test_face_down_beats_generic_shoulder_rule() {
        let thresholds = PostureThresholds::default();
        // Eyes also compressed; the shoulder rule still wins
        let set = landmarks((0.405, 0.7), (0.40, 0.41), (0.40, 0.41), 0.5);
        assert_eq!(classify(Some(&set), &thresholds), PostureLabel::Tummy);
    }

    #[test]
    fn test_compressed_shoulders_nose_position_decides() {
        let thresholds = PostureThresholds {
            shoulder: 0.3,
            eye: 0.07,
            ..PostureThresholds::default()
        };

        let below = landmarks((0.405, 0.7), (0.3, 0.5), (0.40, 0.41), 0.5);
        assert_eq!(classify(Some(&below), &thresholds), PostureLabel::Tummy);

        let above = landmarks((0.405, 0.2), (0.3, 0.5), (0.40, 0.41), 0.5);
        assert_eq!(classify(Some(&above), &thresholds), PostureLabel::Side);

        let off_centre = landmarks((0.6, 0.7), (0.3, 0.5), (0.40, 0.41), 0.5);
        assert_eq!(classify(Some(&off_centre), &thresholds), PostureLabel::Side);
    }

    #[test]
    fn test_shoulder_only_variant_without_refinement() {
        let thresholds = PostureThresholds {
            face_down_refinement: false,
            ..PostureThresholds::default()
        };
        let above = landmarks((0.405, 0.2), (0.3, 0.5), (0.40, 0.41), 0.5);
        assert_eq!(classify(Some(&above), &thresholds), PostureLabel::Tummy);
    }

    #[test]
    fn test_threshold_ties_do_not_trigger() {
        let thresholds = PostureThresholds {
            shoulder: 0.25,
            eye: 0.125,
            ..PostureThresholds::default()
        };
        // Shoulder and eye distances exactly equal their thresholds
        let set = landmarks((0.5, 0.3), (0.5, 0.625), (0.25, 0.5), 0.5);
        assert_eq!(classify(Some(&set), &thresholds), PostureLabel::Safe);
    }

    #[test]
    fn test_from_config() {
        let config = ClassifierConfig { eye_threshold: 0.02, ..ClassifierConfig::default() };
        let thresholds = PostureThresholds::from_config(&config);
        assert_eq!(thresholds.eye, 0.02);
        assert_eq!(thresholds.shoulder, 0.3);
        assert!(thresholds.face_down_refinement);
    }
}

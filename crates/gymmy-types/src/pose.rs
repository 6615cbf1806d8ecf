use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Body joints reported by the pose detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LandmarkType {
    Nose,
    LeftEyeInner,
    LeftEye,
    LeftEyeOuter,
    RightEyeInner,
    RightEye,
    RightEyeOuter,
    LeftEar,
    RightEar,
    LeftMouth,
    RightMouth,
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

impl LandmarkType {
    pub const ALL: [LandmarkType; 33] = {
        use LandmarkType::*;
        [
            Nose,
            LeftEyeInner,
            LeftEye,
            LeftEyeOuter,
            RightEyeInner,
            RightEye,
            RightEyeOuter,
            LeftEar,
            RightEar,
            LeftMouth,
            RightMouth,
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
        ]
    };
}

/// Position in image pixel coordinates (origin top-left).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f32,
    pub y: f32,
}

impl Point2 {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub kind: LandmarkType,
    pub position: Point2,
    /// Detector confidence that the joint lies inside the frame, 0.0..=1.0.
    pub in_frame_likelihood: f32,
}

/// Single-person pose: at most one landmark per joint; undetected joints are absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    landmarks: BTreeMap<LandmarkType, Landmark>,
}

impl Pose {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, landmark: Landmark) -> Option<Landmark> {
        self.landmarks.insert(landmark.kind, landmark)
    }

    pub fn with(mut self, kind: LandmarkType, x: f32, y: f32) -> Self {
        self.insert(Landmark {
            kind,
            position: Point2::new(x, y),
            in_frame_likelihood: 1.0,
        });
        self
    }

    pub fn get(&self, kind: LandmarkType) -> Option<&Landmark> {
        self.landmarks.get(&kind)
    }

    pub fn landmarks(&self) -> impl Iterator<Item = &Landmark> {
        self.landmarks.values()
    }

    pub fn len(&self) -> usize {
        self.landmarks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.landmarks.is_empty()
    }
}

impl FromIterator<Landmark> for Pose {
    fn from_iter<I: IntoIterator<Item = Landmark>>(iter: I) -> Self {
        let mut pose = Pose::new();
        for landmark in iter {
            pose.insert(landmark);
        }
        pose
    }
}

/// Pair of joints connected by a drawn segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkeletonEdge {
    pub from: LandmarkType,
    pub to: LandmarkType,
}

impl SkeletonEdge {
    pub const fn new(from: LandmarkType, to: LandmarkType) -> Self {
        Self { from, to }
    }
}

pub const SKELETON_EDGES: [SkeletonEdge; 12] = {
    use LandmarkType::*;
    [
        // arms
        SkeletonEdge::new(LeftShoulder, LeftElbow),
        SkeletonEdge::new(LeftElbow, LeftWrist),
        SkeletonEdge::new(RightShoulder, RightElbow),
        SkeletonEdge::new(RightElbow, RightWrist),
        // torso
        SkeletonEdge::new(LeftShoulder, RightShoulder),
        SkeletonEdge::new(LeftHip, RightHip),
        SkeletonEdge::new(LeftShoulder, LeftHip),
        SkeletonEdge::new(RightShoulder, RightHip),
        // legs
        SkeletonEdge::new(LeftHip, LeftKnee),
        SkeletonEdge::new(LeftKnee, LeftAnkle),
        SkeletonEdge::new(RightHip, RightKnee),
        SkeletonEdge::new(RightKnee, RightAnkle),
    ]
};

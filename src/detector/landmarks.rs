//! 33-point body landmark topology.

pub const POSE_LANDMARK_COUNT: usize = 33;

/// Skeleton edges between landmark indices.
pub const POSE_CONNECTIONS: [(usize, usize); 35] = [
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 7),
    (0, 4),
    (4, 5),
    (5, 6),
    (6, 8),
    (9, 10),
    (11, 12),
    (11, 13),
    (13, 15),
    (15, 17),
    (15, 19),
    (15, 21),
    (17, 19),
    (12, 14),
    (14, 16),
    (16, 18),
    (16, 20),
    (16, 22),
    (18, 20),
    (11, 23),
    (12, 24),
    (23, 24),
    (23, 25),
    (24, 26),
    (25, 27),
    (26, 28),
    (27, 29),
    (28, 30),
    (29, 31),
    (30, 32),
    (27, 31),
    (28, 32),
];

/// Upright standing pose in a unit box centred on the origin, `(x, y, z)`
/// with y growing downwards.
pub(crate) const STANDING_TEMPLATE: [(f32, f32, f32); POSE_LANDMARK_COUNT] = [
    (0.00, -0.45, -0.12), // nose
    (-0.03, -0.48, -0.11),
    (-0.05, -0.48, -0.11),
    (-0.07, -0.48, -0.11),
    (0.03, -0.48, -0.11),
    (0.05, -0.48, -0.11),
    (0.07, -0.48, -0.11),
    (-0.10, -0.46, -0.05), // ears
    (0.10, -0.46, -0.05),
    (-0.03, -0.41, -0.10), // mouth
    (0.03, -0.41, -0.10),
    (-0.18, -0.30, 0.00), // shoulders
    (0.18, -0.30, 0.00),
    (-0.26, -0.12, 0.02), // elbows
    (0.26, -0.12, 0.02),
    (-0.30, 0.05, -0.02), // wrists
    (0.30, 0.05, -0.02),
    (-0.32, 0.09, -0.03),
    (0.32, 0.09, -0.03),
    (-0.30, 0.10, -0.04),
    (0.30, 0.10, -0.04),
    (-0.28, 0.08, -0.03),
    (0.28, 0.08, -0.03),
    (-0.11, 0.05, 0.00), // hips
    (0.11, 0.05, 0.00),
    (-0.12, 0.26, 0.01), // knees
    (0.12, 0.26, 0.01),
    (-0.12, 0.45, 0.04), // ankles
    (0.12, 0.45, 0.04),
    (-0.13, 0.48, 0.05),
    (0.13, 0.48, 0.05),
    (-0.09, 0.50, -0.02),
    (0.09, 0.50, -0.02),
];

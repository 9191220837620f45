//! Head pose estimation.
//!
//! Six fixed face-mesh landmarks are lifted to 3D (pixel x/y, depth as the raw
//! normalized z, which is already expressed in image widths) and matched
//! against their 2D pixel projections under a pinhole camera:
//!
//! - focal length = image width, principal point = image centre
//! - zero lens distortion
//!
//! The perspective-n-point problem is solved by Levenberg-Marquardt over a
//! rotation vector and a translation. The rotation is then decomposed with the
//! RQ Givens sequence (x axis, then y, then z): the x angle is pitch and the y
//! angle is yaw, in degrees, multiplied by [`ANGLE_SCALE`].

use nalgebra::{DMatrix, DVector, Matrix3, Rotation3, Vector2, Vector3, Vector6};
use thiserror::Error;

use crate::detect::{index, FaceLandmarkSet, POSE_LANDMARKS};

/// Gain applied to the decomposed angles (degrees) before threshold comparison.
///
/// The thresholds were tuned against this scale with depth left in normalized
/// units. Multiplying depth into pixels as well puts a frontal face tens of
/// degrees off axis, so the two must change together.
pub const ANGLE_SCALE: f64 = 360.0;

const MAX_ITERATIONS: usize = 100;
const MAX_DAMPING: f64 = 1e12;
const STEP_TOLERANCE: f64 = 1e-10;
const COST_TOLERANCE: f64 = 1e-12;
const GRADIENT_TOLERANCE: f64 = 1e-12;
/// Minimum spread (pixels²) of the image points for a well-posed solve.
const MIN_POINT_SPREAD: f64 = 1e-6;

#[derive(Debug, Error, PartialEq)]
pub enum PoseError {
    #[error("insufficient landmarks: need {required} valid pose points, found {found}")]
    InsufficientLandmarks { required: usize, found: usize },
    #[error("invalid image dimensions {width}x{height}")]
    InvalidImage { width: u32, height: u32 },
    #[error("degenerate landmark geometry: {0}")]
    Degenerate(&'static str),
    #[error("pose solve failed: {0}")]
    SolveFailed(String),
}

/// Yaw/pitch for one face. Negative yaw = looking toward the subject's right,
/// positive pitch = looking up.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PoseEstimate {
    pub yaw_degrees: f64,
    pub pitch_degrees: f64,
    /// Nose tip in pixels (visualization only).
    pub nose_anchor: (i32, i32),
}

/// Camera intrinsics of the pinhole approximation.
#[derive(Clone, Copy, Debug)]
struct Camera {
    focal: f64,
    cx: f64,
    cy: f64,
}

impl Camera {
    fn for_image(width: u32, height: u32) -> Self {
        Self {
            focal: f64::from(width),
            cx: f64::from(width) / 2.0,
            cy: f64::from(height) / 2.0,
        }
    }

    fn project(
        &self,
        rotation: &Rotation3<f64>,
        translation: &Vector3<f64>,
        point: &Vector3<f64>,
    ) -> Option<Vector2<f64>> {
        let pc = rotation * point + translation;
        if pc.z <= f64::EPSILON {
            return None;
        }
        Some(Vector2::new(
            self.focal * pc.x / pc.z + self.cx,
            self.focal * pc.y / pc.z + self.cy,
        ))
    }
}

#[derive(Clone, Debug, Default)]
pub struct HeadPoseEstimator {
    _private: (),
}

impl HeadPoseEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn estimate(
        &self,
        landmarks: &FaceLandmarkSet,
        image_width: u32,
        image_height: u32,
    ) -> Result<PoseEstimate, PoseError> {
        if image_width == 0 || image_height == 0 {
            return Err(PoseError::InvalidImage {
                width: image_width,
                height: image_height,
            });
        }
        let w = f64::from(image_width);
        let h = f64::from(image_height);

        let selected: Vec<_> = POSE_LANDMARKS
            .iter()
            .filter_map(|&idx| landmarks.point(idx))
            .collect();
        if selected.len() < POSE_LANDMARKS.len() {
            return Err(PoseError::InsufficientLandmarks {
                required: POSE_LANDMARKS.len(),
                found: selected.len(),
            });
        }

        let image_points: Vec<Vector2<f64>> = selected
            .iter()
            .map(|p| Vector2::new(f64::from(p.x) * w, f64::from(p.y) * h))
            .collect();
        let object_points: Vec<Vector3<f64>> = selected
            .iter()
            .zip(&image_points)
            .map(|(p, ip)| Vector3::new(ip.x, ip.y, f64::from(p.z)))
            .collect();
        check_spread(&image_points)?;

        let camera = Camera::for_image(image_width, image_height);
        let rotation = solve_pnp(&camera, &object_points, &image_points)?;
        let (pitch, yaw, _roll) = rq_euler_degrees(rotation.matrix());
        if !pitch.is_finite() || !yaw.is_finite() {
            return Err(PoseError::SolveFailed("non-finite rotation".to_string()));
        }

        let nose = landmarks
            .point(index::NOSE_TIP)
            .map(|p| (f64::from(p.x) * w, f64::from(p.y) * h))
            .unwrap_or((camera.cx, camera.cy));
        Ok(PoseEstimate {
            yaw_degrees: yaw * ANGLE_SCALE,
            pitch_degrees: pitch * ANGLE_SCALE,
            nose_anchor: (nose.0.round() as i32, nose.1.round() as i32),
        })
    }
}

fn check_spread(points: &[Vector2<f64>]) -> Result<(), PoseError> {
    let n = points.len() as f64;
    let mean = points.iter().fold(Vector2::zeros(), |acc, p| acc + p) / n;
    let mut cov = nalgebra::Matrix2::<f64>::zeros();
    for p in points {
        let d = p - mean;
        cov += d * d.transpose();
    }
    cov /= n;
    if cov.trace() < MIN_POINT_SPREAD {
        return Err(PoseError::Degenerate("landmarks collapse to a single point"));
    }
    if cov.determinant() < MIN_POINT_SPREAD {
        return Err(PoseError::Degenerate("landmarks are collinear"));
    }
    Ok(())
}

fn unpack(params: &Vector6<f64>) -> (Rotation3<f64>, Vector3<f64>) {
    let rvec = Vector3::new(params[0], params[1], params[2]);
    let tvec = Vector3::new(params[3], params[4], params[5]);
    (Rotation3::new(rvec), tvec)
}

fn residuals(
    camera: &Camera,
    params: &Vector6<f64>,
    object_points: &[Vector3<f64>],
    image_points: &[Vector2<f64>],
) -> Option<DVector<f64>> {
    let (rotation, translation) = unpack(params);
    let mut out = DVector::zeros(object_points.len() * 2);
    for (i, (obj, img)) in object_points.iter().zip(image_points).enumerate() {
        let projected = camera.project(&rotation, &translation, obj)?;
        out[2 * i] = projected.x - img.x;
        out[2 * i + 1] = projected.y - img.y;
    }
    if out.iter().all(|v| v.is_finite()) {
        Some(out)
    } else {
        None
    }
}

fn jacobian(
    camera: &Camera,
    params: &Vector6<f64>,
    object_points: &[Vector3<f64>],
    image_points: &[Vector2<f64>],
) -> Option<DMatrix<f64>> {
    let mut jac = DMatrix::zeros(object_points.len() * 2, 6);
    for col in 0..6 {
        let step = 1e-6 * params[col].abs().max(1.0);
        let mut forward = *params;
        forward[col] += step;
        let mut backward = *params;
        backward[col] -= step;
        let rf = residuals(camera, &forward, object_points, image_points)?;
        let rb = residuals(camera, &backward, object_points, image_points)?;
        jac.set_column(col, &((rf - rb) / (2.0 * step)));
    }
    Some(jac)
}

/// Initial guess: identity rotation, camera at one focal length, translation
/// fitted in closed form under that rotation.
fn initial_params(
    camera: &Camera,
    object_points: &[Vector3<f64>],
    image_points: &[Vector2<f64>],
) -> Vector6<f64> {
    let tz = camera.focal;
    let n = object_points.len() as f64;
    let mut tx = 0.0;
    let mut ty = 0.0;
    for (obj, img) in object_points.iter().zip(image_points) {
        let depth = obj.z + tz;
        tx += (img.x - camera.cx) * depth / camera.focal - obj.x;
        ty += (img.y - camera.cy) * depth / camera.focal - obj.y;
    }
    Vector6::new(0.0, 0.0, 0.0, tx / n, ty / n, tz)
}

fn solve_pnp(
    camera: &Camera,
    object_points: &[Vector3<f64>],
    image_points: &[Vector2<f64>],
) -> Result<Rotation3<f64>, PoseError> {
    let mut params = initial_params(camera, object_points, image_points);
    let mut residual = residuals(camera, &params, object_points, image_points).ok_or_else(|| {
        PoseError::SolveFailed("initial pose places landmarks behind the camera".to_string())
    })?;
    let mut cost = residual.norm_squared();
    let mut damping = 1e-3;
    let mut converged = false;

    for _ in 0..MAX_ITERATIONS {
        let jac = jacobian(camera, &params, object_points, image_points)
            .ok_or_else(|| PoseError::SolveFailed("jacobian left the image plane".to_string()))?;
        let jtj = jac.transpose() * &jac;
        let gradient = jac.transpose() * &residual;
        if gradient.amax() <= GRADIENT_TOLERANCE * (1.0 + cost) {
            converged = true;
            break;
        }

        let rhs = -gradient.clone();
        let mut improved = false;
        while damping <= MAX_DAMPING {
            let mut normal = jtj.clone();
            for i in 0..6 {
                normal[(i, i)] += damping * jtj[(i, i)].max(1e-9);
            }
            let Some(step) = normal.lu().solve(&rhs) else {
                damping *= 10.0;
                continue;
            };
            let step = Vector6::from_iterator(step.iter().copied());
            let candidate = params + step;
            match residuals(camera, &candidate, object_points, image_points) {
                Some(r) if r.norm_squared() < cost => {
                    let new_cost = r.norm_squared();
                    let small_step =
                        step.norm() <= STEP_TOLERANCE * (params.norm() + STEP_TOLERANCE);
                    let small_gain = cost - new_cost <= COST_TOLERANCE * cost;
                    params = candidate;
                    cost = new_cost;
                    residual = r;
                    damping = (damping / 10.0).max(1e-12);
                    improved = true;
                    converged = small_step || small_gain;
                    break;
                }
                _ => damping *= 10.0,
            }
        }
        if !improved {
            // No descent direction left at any damping: a local minimum.
            converged = true;
        }
        if converged {
            break;
        }
    }

    if !converged {
        return Err(PoseError::SolveFailed(format!(
            "no convergence after {} iterations",
            MAX_ITERATIONS
        )));
    }
    if !cost.is_finite() {
        return Err(PoseError::SolveFailed("non-finite reprojection error".to_string()));
    }
    Ok(unpack(&params).0)
}

/// RQ decomposition angles (degrees) about x, y, z via Givens rotations.
fn rq_euler_degrees(m: &Matrix3<f64>) -> (f64, f64, f64) {
    let theta_x = m[(2, 1)].atan2(m[(2, 2)]);
    let (sx, cx) = theta_x.sin_cos();
    let qx = Matrix3::new(1.0, 0.0, 0.0, 0.0, cx, sx, 0.0, -sx, cx);
    let r = m * qx;

    let theta_y = (-r[(2, 0)]).atan2(r[(2, 2)]);
    let (sy, cy) = theta_y.sin_cos();
    let qy = Matrix3::new(cy, 0.0, -sy, 0.0, 1.0, 0.0, sy, 0.0, cy);
    let r = r * qy;

    let theta_z = r[(1, 0)].atan2(r[(1, 1)]);
    (theta_x.to_degrees(), theta_y.to_degrees(), theta_z.to_degrees())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Thresholds;
    use crate::detect::LandmarkPoint;

    const W: u32 = 640;
    const H: u32 = 480;

    #[test]
    fn frontal_face_has_zero_yaw_and_pitch() {
        let pose = HeadPoseEstimator::new()
            .estimate(&FaceLandmarkSet::frontal(), W, H)
            .unwrap();
        assert!(pose.yaw_degrees.abs() < 1e-6, "yaw {}", pose.yaw_degrees);
        assert!(pose.pitch_degrees.abs() < 1e-6, "pitch {}", pose.pitch_degrees);
        assert_eq!(pose.nose_anchor, (320, 250));
    }

    #[test]
    fn frontal_face_with_depth_stays_inside_thresholds() {
        let face = fixtures::face([
            (0.40, 0.42, 0.05),
            (0.60, 0.42, 0.05),
            (0.50, 0.52, -0.08),
            (0.44, 0.62, 0.03),
            (0.56, 0.62, 0.03),
            (0.50, 0.72, 0.02),
        ]);
        let limits = Thresholds::default();
        for (w, h) in [(W, H), (1280, 720)] {
            let pose = HeadPoseEstimator::new().estimate(&face, w, h).unwrap();
            assert!(pose.yaw_degrees.abs() < 1e-3, "{w}x{h} yaw {}", pose.yaw_degrees);
            assert!(
                pose.pitch_degrees.abs() < limits.pitch_threshold_degrees,
                "{w}x{h} pitch {}",
                pose.pitch_degrees
            );
        }
    }

    #[test]
    fn yaw_sign_follows_turn_direction() {
        let estimator = HeadPoseEstimator::new();
        let limits = Thresholds::default();

        let left = estimator.estimate(&fixtures::turned_left(), W, H).unwrap();
        assert!(left.yaw_degrees > limits.yaw_threshold_degrees, "yaw {}", left.yaw_degrees);
        assert!(left.pitch_degrees.abs() < limits.pitch_threshold_degrees);

        let right = estimator.estimate(&fixtures::turned_right(), W, H).unwrap();
        assert!(right.yaw_degrees < -limits.yaw_threshold_degrees, "yaw {}", right.yaw_degrees);
        assert!(right.pitch_degrees.abs() < limits.pitch_threshold_degrees);
    }

    #[test]
    fn nodding_down_gives_negative_pitch() {
        let pose = HeadPoseEstimator::new()
            .estimate(&fixtures::looking_down(), W, H)
            .unwrap();
        assert!(pose.yaw_degrees.abs() < 1e-3, "yaw {}", pose.yaw_degrees);
        assert!(
            pose.pitch_degrees < -Thresholds::default().pitch_threshold_degrees,
            "pitch {}",
            pose.pitch_degrees
        );
    }

    #[test]
    fn rq_decomposition_recovers_axis_rotations() {
        let pitch = Rotation3::from_axis_angle(&Vector3::x_axis(), 0.1);
        let (x, y, z) = rq_euler_degrees(pitch.matrix());
        assert!((x - 0.1f64.to_degrees()).abs() < 1e-9);
        assert!(y.abs() < 1e-9 && z.abs() < 1e-9);

        let yaw = Rotation3::from_axis_angle(&Vector3::y_axis(), -0.2);
        let (x, y, z) = rq_euler_degrees(yaw.matrix());
        assert!((y + 0.2f64.to_degrees()).abs() < 1e-9);
        assert!(x.abs() < 1e-9 && z.abs() < 1e-9);
    }

    #[test]
    fn too_few_landmarks_is_reported() {
        let face = FaceLandmarkSet::new(vec![LandmarkPoint::new(0.5, 0.5, 0.0); 100]);
        let err = HeadPoseEstimator::new().estimate(&face, W, H).unwrap_err();
        assert_eq!(
            err,
            PoseError::InsufficientLandmarks {
                required: 6,
                found: 3
            }
        );
    }

    #[test]
    fn non_finite_landmark_counts_as_missing() {
        let face = FaceLandmarkSet::frontal()
            .with_point(index::CHIN, LandmarkPoint::new(0.5, f32::INFINITY, 0.0));
        let err = HeadPoseEstimator::new().estimate(&face, W, H).unwrap_err();
        assert!(matches!(err, PoseError::InsufficientLandmarks { found: 5, .. }));
    }

    #[test]
    fn collapsed_landmarks_are_degenerate() {
        let face = FaceLandmarkSet::new(vec![LandmarkPoint::new(0.5, 0.5, 0.0); index::MESH_SIZE]);
        let err = HeadPoseEstimator::new().estimate(&face, W, H).unwrap_err();
        assert!(matches!(err, PoseError::Degenerate(_)));
    }

    #[test]
    fn zero_sized_image_is_rejected() {
        let err = HeadPoseEstimator::new()
            .estimate(&FaceLandmarkSet::frontal(), 0, H)
            .unwrap_err();
        assert_eq!(err, PoseError::InvalidImage { width: 0, height: H });
    }
}

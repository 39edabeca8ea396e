/// Matrix and vector helpers. Matrices are 4x4 column-major `[f32; 16]`,
/// the layout uploaded to the backend unchanged.
pub type Mat4 = [f32; 16];
pub type Vec3 = [f32; 3];

/// Column-major index of row `row`, column `col`.
#[inline(always)]
pub const fn cm(row: usize, col: usize) -> usize {
    col * 4 + row
}

/// Create an identity 4x4 matrix.
pub fn identity() -> Mat4 {
    [
        1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0,
    ]
}

/// `a * b`.
pub fn multiply(a: &Mat4, b: &Mat4) -> Mat4 {
    let mut out = [0.0; 16];
    for col in 0..4 {
        for row in 0..4 {
            out[cm(row, col)] = (0..4).map(|k| a[cm(row, k)] * b[cm(k, col)]).sum();
        }
    }
    out
}

pub fn translation(x: f32, y: f32, z: f32) -> Mat4 {
    let mut m = identity();
    m[12] = x;
    m[13] = y;
    m[14] = z;
    m
}

pub fn scale(s: f32) -> Mat4 {
    let mut m = identity();
    m[0] = s;
    m[5] = s;
    m[10] = s;
    m
}

/// Perspective projection equivalent to `gluPerspective`.
pub fn perspective(fov_y_degrees: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
    let f = 1.0 / (fov_y_degrees.to_radians() * 0.5).tan();
    let mut m = [0.0; 16];
    m[cm(0, 0)] = f / aspect;
    m[cm(1, 1)] = f;
    m[cm(2, 2)] = (far + near) / (near - far);
    m[cm(2, 3)] = (2.0 * far * near) / (near - far);
    m[cm(3, 2)] = -1.0;
    m
}

/// Build a matrix from a Real3D matrix record: translation in words 0..2,
/// followed by a row-major 3x3.
pub fn from_real3d(src: &[f32; 12]) -> Mat4 {
    let mut m = [0.0; 16];
    m[cm(0, 0)] = src[3];
    m[cm(0, 1)] = src[4];
    m[cm(0, 2)] = src[5];
    m[cm(0, 3)] = src[0];
    m[cm(1, 0)] = src[6];
    m[cm(1, 1)] = src[7];
    m[cm(1, 2)] = src[8];
    m[cm(1, 3)] = src[1];
    m[cm(2, 0)] = src[9];
    m[cm(2, 1)] = src[10];
    m[cm(2, 2)] = src[11];
    m[cm(2, 3)] = src[2];
    m[cm(3, 3)] = 1.0;
    m
}

/// Multiply by the upper-left 3x3 of `m`.
pub fn mul_mat3_vec3(m: &Mat4, v: &Vec3) -> Vec3 {
    [
        m[cm(0, 0)] * v[0] + m[cm(0, 1)] * v[1] + m[cm(0, 2)] * v[2],
        m[cm(1, 0)] * v[0] + m[cm(1, 1)] * v[1] + m[cm(1, 2)] * v[2],
        m[cm(2, 0)] * v[0] + m[cm(2, 1)] * v[1] + m[cm(2, 2)] * v[2],
    ]
}

/// Inverse-transpose of the upper-left 3x3 (the normal matrix). Only the
/// 3x3 part of the result is meaningful.
pub fn invert_transpose3(m: &Mat4) -> Mat4 {
    let (a00, a01, a02) = (m[cm(0, 0)], m[cm(0, 1)], m[cm(0, 2)]);
    let (a10, a11, a12) = (m[cm(1, 0)], m[cm(1, 1)], m[cm(1, 2)]);
    let (a20, a21, a22) = (m[cm(2, 0)], m[cm(2, 1)], m[cm(2, 2)]);

    let inv_det = 1.0
        / (a00 * (a22 * a11 - a21 * a12) - a10 * (a22 * a01 - a21 * a02)
            + a20 * (a12 * a01 - a11 * a02));

    let mut out = [0.0; 16];
    out[cm(0, 0)] = inv_det * (a22 * a11 - a21 * a12);
    out[cm(1, 0)] = inv_det * -(a22 * a01 - a21 * a02);
    out[cm(2, 0)] = inv_det * (a12 * a01 - a11 * a02);
    out[cm(0, 1)] = inv_det * -(a22 * a10 - a20 * a12);
    out[cm(1, 1)] = inv_det * (a22 * a00 - a20 * a02);
    out[cm(2, 1)] = inv_det * -(a12 * a00 - a10 * a02);
    out[cm(0, 2)] = inv_det * (a21 * a10 - a20 * a11);
    out[cm(1, 2)] = inv_det * -(a21 * a00 - a20 * a01);
    out[cm(2, 2)] = inv_det * (a11 * a00 - a10 * a01);
    out[15] = 1.0;
    out
}

#[inline]
pub fn cross(a: &Vec3, b: &Vec3) -> Vec3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

#[inline]
pub fn dot(a: &Vec3, b: &Vec3) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[inline]
pub fn sub(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

/// -1, 0 or 1. Unlike `f32::signum`, zero maps to zero.
#[inline]
pub fn sign(x: f32) -> f32 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: &Mat4, b: &Mat4) -> bool {
        a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() < 1e-5)
    }

    #[test]
    fn multiply_by_identity() {
        let t = translation(1.0, 2.0, 3.0);
        assert!(approx(&multiply(&identity(), &t), &t));
        assert!(approx(&multiply(&t, &identity()), &t));
    }

    #[test]
    fn translations_compose() {
        let m = multiply(&translation(1.0, 0.0, 0.0), &translation(0.0, 2.0, 0.0));
        assert_eq!(&m[12..15], &[1.0, 2.0, 0.0]);
    }

    #[test]
    fn real3d_record_layout() {
        let src = [10.0, 20.0, 30.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0];
        let m = from_real3d(&src);
        assert_eq!(m[cm(0, 3)], 10.0);
        assert_eq!(m[cm(2, 3)], 30.0);
        assert_eq!(m[cm(0, 1)], 2.0);
        assert_eq!(m[cm(2, 0)], 7.0);
        assert_eq!(m[15], 1.0);
    }

    #[test]
    fn normal_matrix_of_uniform_scale() {
        let it = invert_transpose3(&scale(2.0));
        assert!((it[0] - 0.5).abs() < 1e-6);
        assert!((it[5] - 0.5).abs() < 1e-6);
        assert!((it[10] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn sign_of_zero_is_zero() {
        assert_eq!(sign(0.0), 0.0);
        assert_eq!(sign(-0.0), 0.0);
        assert_eq!(sign(-3.0), -1.0);
    }

    #[test]
    fn cross_of_axes() {
        assert_eq!(cross(&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0]), [0.0, 0.0, 1.0]);
    }
}

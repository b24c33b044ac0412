// math.rs — the small amount of vector math the sync core needs

pub type Vec3 = [f32; 3];

pub fn vec3_add(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

pub fn vec3_sub(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

pub fn vec3_scale(v: &Vec3, s: f32) -> Vec3 {
    [v[0] * s, v[1] * s, v[2] * s]
}

/// v + dir*scale in one step.
pub fn vec3_ma(v: &Vec3, scale: f32, dir: &Vec3) -> Vec3 {
    [
        v[0] + dir[0] * scale,
        v[1] + dir[1] * scale,
        v[2] + dir[2] * scale,
    ]
}

pub fn vec3_length(v: &Vec3) -> f32 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

pub fn vec3_dist(a: &Vec3, b: &Vec3) -> f32 {
    vec3_length(&vec3_sub(a, b))
}

/// Linear blend; t=0 yields a, t=1 yields b.
pub fn vec3_lerp(a: &Vec3, b: &Vec3, t: f32) -> Vec3 {
    [
        a[0] + (b[0] - a[0]) * t,
        a[1] + (b[1] - a[1]) * t,
        a[2] + (b[2] - a[2]) * t,
    ]
}

/// Angle lerp with wrap-around: each component takes the short way through
/// the -180..180 seam.
pub fn angles_lerp(a: &Vec3, b: &Vec3, t: f32) -> Vec3 {
    let mut out = [0.0f32; 3];
    for i in 0..3 {
        let mut diff = b[i] - a[i];
        while diff > 180.0 {
            diff -= 360.0;
        }
        while diff < -180.0 {
            diff += 360.0;
        }
        out[i] = a[i] + diff * t;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec3_lerp_endpoints() {
        let a = [1.0, 2.0, 3.0];
        let b = [5.0, 6.0, 7.0];
        assert_eq!(vec3_lerp(&a, &b, 0.0), a);
        assert_eq!(vec3_lerp(&a, &b, 1.0), b);
        assert_eq!(vec3_lerp(&a, &b, 0.5), [3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_angles_lerp_takes_short_way() {
        let a = [170.0, 0.0, 0.0];
        let b = [-170.0, 0.0, 0.0];
        let mid = angles_lerp(&a, &b, 0.5);
        // Midpoint through the seam is 180, not 0.
        assert!((mid[0].abs() - 180.0).abs() < 0.001);
    }

    #[test]
    fn test_vec3_ma() {
        let p = [1.0, 1.0, 1.0];
        let v = [2.0, 0.0, -2.0];
        assert_eq!(vec3_ma(&p, 0.5, &v), [2.0, 1.0, 0.0]);
    }
}

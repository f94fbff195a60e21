//! Compact lossy codec for unit surface normals.
//!
//! Only the x and y components are stored, quantized to 16 bits each; z is
//! reconstructed from the unit-length constraint and always comes back
//! non-negative. Normals pointing into the negative-z hemisphere therefore
//! do not round-trip exactly. This one bit of information is dropped on
//! purpose to fit a normal into the 32-bit slot of a hit record.

use glam::Vec3A;

/// Pack a normal into two 16-bit fields (x low, y high).
///
/// The input is normalized first; x and y are mapped from [-1,1] to
/// [0,65535] with round-to-nearest.
pub fn pack_normal(normal: Vec3A) -> u32 {
    let n = normal.normalize();

    let nx = (n.x + 1.0) * 0.5;
    let ny = (n.y + 1.0) * 0.5;

    let x = (nx * 65535.0).round() as u32;
    let y = (ny * 65535.0).round() as u32;

    (x & 0xFFFF) | ((y & 0xFFFF) << 16)
}

/// Unpack a normal packed by [`pack_normal`].
///
/// z is reconstructed as sqrt(max(0, 1 - x^2 - y^2)) and is never negative;
/// see the module docs for why this is not corrected.
pub fn unpack_normal(packed: u32) -> Vec3A {
    let x = (packed & 0xFFFF) as f32 / 65535.0;
    let y = ((packed >> 16) & 0xFFFF) as f32 / 65535.0;

    let nx = x * 2.0 - 1.0;
    let ny = y * 2.0 - 1.0;
    let nz = (1.0 - nx * nx - ny * ny).max(0.0).sqrt();

    Vec3A::new(nx, ny, nz)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f32 = 1.0 / 65535.0;

    #[test]
    fn round_trip_upper_hemisphere() {
        let inputs = [
            Vec3A::new(0.0, 0.0, 1.0),
            Vec3A::new(1.0, 0.0, 0.0),
            Vec3A::new(0.0, -1.0, 0.0),
            Vec3A::new(0.3, 0.4, 0.866).normalize(),
            Vec3A::new(-0.7, 0.2, 0.5).normalize(),
        ];
        for n in inputs {
            let r = unpack_normal(pack_normal(n));
            assert!((r.x - n.x).abs() <= TOLERANCE, "x mismatch for {n:?}");
            assert!((r.y - n.y).abs() <= TOLERANCE, "y mismatch for {n:?}");
            // z tolerance is looser near the equator where sqrt amplifies
            // quantization error, but these inputs stay well inside it.
            assert!((r.z - n.z).abs() <= 4.0 * TOLERANCE, "z mismatch for {n:?}");
        }
    }

    #[test]
    fn lower_hemisphere_folds_to_upper() {
        let n = Vec3A::new(0.2, 0.3, -0.8).normalize();
        let r = unpack_normal(pack_normal(n));
        assert!((r.x - n.x).abs() <= TOLERANCE);
        assert!((r.y - n.y).abs() <= TOLERANCE);
        assert!(r.z >= 0.0);
        assert!((r.z + n.z).abs() <= 4.0 * TOLERANCE);
    }

    #[test]
    fn unnormalized_input_is_normalized_first() {
        let r = unpack_normal(pack_normal(Vec3A::new(0.0, 0.0, 10.0)));
        assert!((r - Vec3A::Z).abs().max_element() <= TOLERANCE);
    }
}

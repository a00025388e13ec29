//! Detector-network geometry shared by the sky-dependent proposals.
//!
//! Provides the plane-reflection transform through the detector network, the
//! antenna-pattern response, sidereal-time conversion, and geocenter time
//! delays. All positions are Earth-fixed Cartesian coordinates in metres.

use serde::{Deserialize, Serialize};

/// Speed of light in vacuum, m/s.
pub const C_SI: f64 = 299_792_458.0;

/// GPS seconds at the J2000.0 epoch, used by the sidereal-time conversion.
const GPS_J2000: f64 = 630_763_148.816;

const TWO_PI: f64 = 2.0 * std::f64::consts::PI;

pub(crate) fn cross(y: [f64; 3], z: [f64; 3]) -> [f64; 3] {
    [
        y[1] * z[2] - y[2] * z[1],
        y[2] * z[0] - y[0] * z[2],
        y[0] * z[1] - y[1] * z[0],
    ]
}

pub(crate) fn dot(v: [f64; 3], w: [f64; 3]) -> f64 {
    v[0] * w[0] + v[1] * w[1] + v[2] * w[2]
}

pub(crate) fn norm(v: [f64; 3]) -> f64 {
    dot(v, v).sqrt()
}

/// Normalize `v`. Panics on a zero-norm vector: degenerate geometry is a
/// broken setup, not a runtime condition.
pub(crate) fn unit(v: [f64; 3]) -> [f64; 3] {
    let n = norm(v);
    if n == 0.0 {
        panic!("cannot normalize a zero-norm vector");
    }
    [v[0] / n, v[1] / n, v[2] / n]
}

fn sub(w: [f64; 3], v: [f64; 3]) -> [f64; 3] {
    [w[0] - v[0], w[1] - v[1], w[2] - v[2]]
}

/// Reflect `p` through the plane parallel to the one spanned by the three
/// positions `x`, `y`, `z`, passing through the origin. Sky directions live
/// on the unit sphere, so the offset of the physical detector plane is
/// irrelevant.
pub fn reflect_through_plane(p: [f64; 3], x: [f64; 3], y: [f64; 3], z: [f64; 3]) -> [f64; 3] {
    let n_hat = unit(cross(sub(y, x), sub(z, x)));
    let p_normal = dot(p, n_hat);
    [
        p[0] - 2.0 * p_normal * n_hat[0],
        p[1] - 2.0 * p_normal * n_hat[1],
        p[2] - 2.0 * p_normal * n_hat[2],
    ]
}

pub fn sph_to_cart(lat: f64, lon: f64) -> [f64; 3] {
    [
        lon.cos() * lat.cos(),
        lon.sin() * lat.cos(),
        lat.sin(),
    ]
}

pub fn cart_to_sph(v: [f64; 3]) -> (f64, f64) {
    let lat = (v[2] / norm(v)).asin();
    let lon = v[1].atan2(v[0]);
    (lat, lon)
}

/// Greenwich mean sidereal time in radians, from the Earth-rotation-angle
/// expansion about J2000.0.
pub fn greenwich_mean_sidereal_time(gps_seconds: f64) -> f64 {
    let days = (gps_seconds - GPS_J2000) / 86_400.0;
    let turns = 0.779_057_273_264 + 1.002_737_811_911_354_5 * days;
    TWO_PI * turns.rem_euclid(1.0)
}

/// Unit line-of-sight vector towards (`ra`, `dec`) in Earth-fixed
/// coordinates at the given sidereal time.
pub fn line_of_sight(ra: f64, dec: f64, gmst: f64) -> [f64; 3] {
    [
        (gmst - ra).cos() * dec.cos(),
        -(gmst - ra).sin() * dec.cos(),
        dec.sin(),
    ]
}

/// A single interferometric detector: Earth-fixed position and response
/// tensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detector {
    pub name: String,
    /// Earth-fixed position of the beam splitter, metres.
    pub location: [f64; 3],
    /// Symmetric trace-free response tensor `(x⊗x − y⊗y)/2`.
    pub response: [[f64; 3]; 3],
}

impl Detector {
    /// Build a detector from its location and arm direction unit vectors.
    pub fn from_arms(
        name: impl Into<String>,
        location: [f64; 3],
        x_arm: [f64; 3],
        y_arm: [f64; 3],
    ) -> Self {
        let mut response = [[0.0; 3]; 3];
        for (i, row) in response.iter_mut().enumerate() {
            for (j, entry) in row.iter_mut().enumerate() {
                *entry = 0.5 * (x_arm[i] * x_arm[j] - y_arm[i] * y_arm[j]);
            }
        }
        Self {
            name: name.into(),
            location,
            response,
        }
    }

    pub fn same_location(&self, other: &Detector) -> bool {
        self.location == other.location
    }

    /// Antenna-pattern response `(F+, F×)` for a source at (`ra`, `dec`) with
    /// polarisation angle `psi` at sidereal time `gmst`.
    pub fn antenna_response(&self, ra: f64, dec: f64, psi: f64, gmst: f64) -> (f64, f64) {
        let gha = gmst - ra;
        let (singha, cosgha) = gha.sin_cos();
        let (sindec, cosdec) = dec.sin_cos();
        let (sinpsi, cospsi) = psi.sin_cos();

        let x = [
            -cospsi * singha - sinpsi * cosgha * sindec,
            -cospsi * cosgha + sinpsi * singha * sindec,
            sinpsi * cosdec,
        ];
        let y = [
            sinpsi * singha - cospsi * cosgha * sindec,
            sinpsi * cosgha + cospsi * singha * sindec,
            cospsi * cosdec,
        ];

        let mut fplus = 0.0;
        let mut fcross = 0.0;
        for i in 0..3 {
            for j in 0..3 {
                let d = self.response[i][j];
                fplus += (x[i] * x[j] - y[i] * y[j]) * d;
                fcross += (x[i] * y[j] + y[i] * x[j]) * d;
            }
        }
        (fplus, fcross)
    }

    /// Arrival-time offset of this detector relative to the geocenter for a
    /// signal from (`ra`, `dec`) at GPS time `gps`.
    pub fn time_delay_from_geocenter(&self, ra: f64, dec: f64, gps: f64) -> f64 {
        let gmst = greenwich_mean_sidereal_time(gps);
        let k = line_of_sight(ra, dec, gmst);
        -dot(self.location, k) / C_SI
    }
}

/// Fixed list of detectors with co-located instruments deduplicated for the
/// geometry-dependent proposals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorNetwork {
    detectors: Vec<Detector>,
}

impl DetectorNetwork {
    pub fn new(detectors: Vec<Detector>) -> Self {
        Self { detectors }
    }

    pub fn detectors(&self) -> &[Detector] {
        &self.detectors
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }

    /// Detectors at geometrically distinct positions, first occurrence wins.
    pub fn unique_detectors(&self) -> Vec<&Detector> {
        let mut unique: Vec<&Detector> = Vec::new();
        for det in &self.detectors {
            if !unique.iter().any(|u| u.same_location(det)) {
                unique.push(det);
            }
        }
        unique
    }

    pub fn num_unique_positions(&self) -> usize {
        self.unique_detectors().len()
    }
}

/// Reflect a sky position through the plane of the first three unique
/// detector positions, and shift the geocenter time so the arrival-time
/// delay at the reference detector is preserved.
///
/// Must only be called with at least three unique detector positions.
pub fn reflected_position_and_time(
    network: &DetectorNetwork,
    epoch: f64,
    ra: f64,
    dec: f64,
    old_time: f64,
) -> (f64, f64, f64) {
    let unique = network.unique_detectors();
    assert!(
        unique.len() >= 3,
        "plane reflection requires three unique detector positions"
    );

    let gmst = greenwich_mean_sidereal_time(epoch);

    // Equatorial to Earth-fixed geographic coordinates at the epoch.
    let geo_lon = ra - gmst;
    let p = sph_to_cart(dec, geo_lon);

    let reflected = reflect_through_plane(
        p,
        unique[0].location,
        unique[1].location,
        unique[2].location,
    );
    let (new_dec, new_geo_lon) = cart_to_sph(reflected);
    let new_ra = (new_geo_lon + gmst).rem_euclid(TWO_PI);

    let old_delay = unique[0].time_delay_from_geocenter(ra, dec, epoch);
    let new_delay = unique[0].time_delay_from_geocenter(new_ra, new_dec, epoch);
    let new_time = old_time + old_delay - new_delay;

    (new_ra, new_dec, new_time)
}

/// Jointly reflect the extrinsic parameters (sky position, time, distance,
/// inclination, polarisation) so the per-detector antenna-pattern-weighted
/// SNR² allocation is reproduced at the mirror sky position.
///
/// Solves a closed-form quadratic for the new polarisation angle and
/// inclination from the antenna-pattern coefficients of the three unique
/// detectors. Returns the input inclination and distance unchanged when the
/// quadratic is degenerate.
#[allow(clippy::too_many_arguments)]
pub fn reflected_extrinsic_parameters(
    network: &DetectorNetwork,
    epoch: f64,
    ra: f64,
    dec: f64,
    bary_time: f64,
    dist: f64,
    iota: f64,
    psi: f64,
) -> (f64, f64, f64, f64, f64, f64) {
    let unique = network.unique_detectors();
    assert!(
        unique.len() >= 3,
        "extrinsic reflection requires three unique detector positions"
    );
    let frac_pi_4 = std::f64::consts::FRAC_PI_4;

    let gmst = greenwich_mean_sidereal_time(bary_time);
    let (new_ra, new_dec, new_time) =
        reflected_position_and_time(network, epoch, ra, dec, bary_time);
    let new_gmst = greenwich_mean_sidereal_time(new_time);

    let dist2 = dist * dist;
    let cos_iota = iota.cos();
    let cos_iota2 = cos_iota * cos_iota;

    // Per-detector response basis at the reflected position (psi = 0) and
    // SNR² allocation at the current position.
    let mut x = [0.0; 3];
    let mut y = [0.0; 3];
    let mut r2 = [0.0; 3];
    let mut fp_old_last = 0.0;
    let mut fc_old_last = 0.0;
    for (i, det) in unique.iter().take(3).enumerate() {
        let (fp, fc) = det.antenna_response(new_ra, new_dec, 0.0, new_gmst);
        x[i] = fp;
        y[i] = fc;

        let (fp_old, fc_old) = det.antenna_response(ra, dec, psi, gmst);
        r2[i] = ((1.0 + cos_iota2).powi(2) / (4.0 * dist2)) * fp_old * fp_old
            + (cos_iota2 / dist2) * fc_old * fc_old;
        fp_old_last = fp_old;
        fc_old_last = fc_old;
    }
    let x2 = [x[0] * x[0], x[1] * x[1], x[2] * x[2]];
    let y2 = [y[0] * y[0], y[1] * y[1], y[2] * y[2]];

    let a = r2[2] * x2[1] * y2[0] - r2[1] * x2[2] * y2[0] - r2[2] * x2[0] * y2[1]
        + r2[0] * x2[2] * y2[1]
        + r2[1] * x2[0] * y2[2]
        - r2[0] * x2[1] * y2[2];
    let a2 = a * a;
    let b = -(r2[2] * x[0] * x2[1] * y[0]) + r2[1] * x[0] * x2[2] * y[0]
        + r2[2] * x2[0] * x[1] * y[1]
        - r2[0] * x[1] * x2[2] * y[1]
        + r2[2] * x[1] * y2[0] * y[1]
        - r2[2] * x[0] * y[0] * y2[1]
        - r2[1] * x2[0] * x[2] * y[2]
        + r2[0] * x2[1] * x[2] * y[2]
        - r2[1] * x[2] * y2[0] * y[2]
        + r2[0] * x[2] * y2[1] * y[2]
        + r2[1] * x[0] * y[0] * y2[2]
        - r2[0] * x[1] * y[1] * y2[2];

    let mut new_psi = (2.0 * ((b - a * ((a2 + b * b) / a2).sqrt()) / a).atan()) / 4.0;
    while new_psi < 0.0 {
        new_psi += frac_pi_4;
    }
    while new_psi > frac_pi_4 {
        new_psi -= frac_pi_4;
    }

    let response_at = |psi_val: f64| -> ([f64; 3], [f64; 3]) {
        let (sin2, cos2) = (2.0 * psi_val).sin_cos();
        let mut fp = [0.0; 3];
        let mut fc = [0.0; 3];
        for i in 0..3 {
            fp[i] = x[i] * cos2 + y[i] * sin2;
            fc[i] = y[i] * cos2 - x[i] * sin2;
        }
        (fp, fc)
    };

    let (mut new_fplus, mut new_fcross) = response_at(new_psi);
    let mut c12 = -2.0
        * ((r2[0] * new_fcross[1] * new_fcross[1] - r2[1] * new_fcross[0] * new_fcross[0])
            / (r2[0] * new_fplus[1] * new_fplus[1] - r2[1] * new_fplus[0] * new_fplus[0]))
        - 1.0;

    if c12 < 1.0 {
        c12 = (3.0 - c12) / (1.0 + c12);
        new_psi += frac_pi_4;
        let recomputed = response_at(new_psi);
        new_fplus = recomputed.0;
        new_fcross = recomputed.1;
    }

    if c12 < 1.0 {
        // Degenerate quadratic: only the sky position moves.
        return (new_ra, new_dec, new_time, dist, iota, new_psi);
    }

    let cos_new_iota2 = c12 - (c12 * c12 - 1.0).sqrt();
    let cos_new_iota = cos_new_iota2.sqrt();
    let mut new_iota = cos_new_iota.acos();

    let new_dist = ((((1.0 + cos_new_iota2).powi(2) / 4.0) * new_fplus[0] * new_fplus[0]
        + cos_new_iota2 * new_fcross[0] * new_fcross[0])
        / r2[0])
        .sqrt();

    if fp_old_last * new_fplus[2] < 0.0 {
        new_psi += std::f64::consts::FRAC_PI_2;
        new_fcross[2] = -new_fcross[2];
    }
    if fc_old_last * cos_iota * cos_new_iota * new_fcross[2] < 0.0 {
        new_iota = std::f64::consts::PI - new_iota;
    }

    (new_ra, new_dec, new_time, new_dist, new_iota, new_psi)
}

/// The LIGO Hanford 4 km detector.
pub fn ligo_hanford() -> Detector {
    Detector::from_arms(
        "H1",
        [-2.161_414_928_18e6, -3.834_695_183_39e6, 4.600_350_224_78e6],
        [-0.223_891_216_35, 0.799_830_697_305, 0.556_905_359_55],
        [-0.913_978_750_29, 0.026_095_321_20, -0.404_922_650_88],
    )
}

/// The LIGO Livingston 4 km detector.
pub fn ligo_livingston() -> Detector {
    Detector::from_arms(
        "L1",
        [-7.427_604_472_4e4, -5.496_283_719_71e6, 3.224_257_017_44e6],
        [-0.954_574_615_06, -0.141_579_994_06, -0.262_187_738_70],
        [0.297_740_169_66, -0.487_910_627_80, -0.820_544_948_39],
    )
}

/// The Virgo 3 km detector.
pub fn virgo() -> Detector {
    Detector::from_arms(
        "V1",
        [4.546_374_099_00e6, 8.429_896_976_26e5, 4.378_576_962_41e6],
        [-0.700_458_214_79, 0.208_489_486_19, 0.682_561_662_77],
        [-0.053_792_553_68, -0.969_081_805_49, 0.240_804_517_08],
    )
}

/// A three-site network of geometrically independent detectors.
pub fn three_detector_network() -> DetectorNetwork {
    DetectorNetwork::new(vec![ligo_hanford(), ligo_livingston(), virgo()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use is_close::is_close;

    #[test]
    fn unique_positions_deduplicates() {
        let h1 = ligo_hanford();
        let mut h2 = ligo_hanford();
        h2.name = "H2".to_string();
        let network = DetectorNetwork::new(vec![h1, h2, ligo_livingston()]);
        assert_eq!(network.len(), 3);
        assert_eq!(network.num_unique_positions(), 2);
    }

    #[test]
    fn antenna_response_is_bounded() {
        let det = ligo_hanford();
        for i in 0..32 {
            let ra = i as f64 * 0.19;
            let (fp, fc) = det.antenna_response(ra, 0.3, 0.7, 1.2);
            assert!(fp.abs() <= 1.0 + 1e-12);
            assert!(fc.abs() <= 1.0 + 1e-12);
        }
    }

    #[test]
    fn reflection_is_an_involution() {
        let network = three_detector_network();
        let epoch = 1_126_259_462.0;
        let (ra, dec, time) = (1.37, -0.54, epoch + 0.01);

        let (ra1, dec1, t1) = reflected_position_and_time(&network, epoch, ra, dec, time);
        let (ra2, dec2, t2) = reflected_position_and_time(&network, epoch, ra1, dec1, t1);

        assert!(is_close!(ra2, ra, rel_tol = 1e-9));
        assert!(is_close!(dec2, dec, rel_tol = 1e-9));
        // GPS-epoch magnitudes limit the representable time resolution.
        assert!((t2 - time).abs() < 1e-6);
    }

    #[test]
    fn reflection_moves_off_plane_points() {
        let network = three_detector_network();
        let epoch = 1_126_259_462.0;
        let (ra1, dec1, _) = reflected_position_and_time(&network, epoch, 0.9, 0.8, epoch);
        assert!((ra1 - 0.9).abs() > 1e-3 || (dec1 - 0.8).abs() > 1e-3);
    }

    #[test]
    #[should_panic]
    fn zero_norm_unit_vector_panics() {
        unit([0.0, 0.0, 0.0]);
    }

    #[test]
    fn sph_cart_round_trip() {
        let (lat, lon) = (0.42, -1.1);
        let v = sph_to_cart(lat, lon);
        let (lat2, lon2) = cart_to_sph(v);
        assert!(is_close!(lat, lat2));
        assert!(is_close!(lon, lon2));
    }
}

//! Reprojection of marker geometry into WGS84 longitude/latitude.
//!
//! British National Grid coordinates go through the Ordnance Survey inverse
//! transverse Mercator on the Airy 1830 ellipsoid, then a seven-parameter
//! Helmert shift from OSGB36 to WGS84 (accurate to a few metres).

use std::f64::consts::PI;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crs {
    Wgs84,
    BritishNationalGrid,
    WebMercator,
}

impl Crs {
    pub fn from_srs_id(srs_id: i32) -> Option<Self> {
        match srs_id {
            4326 => Some(Self::Wgs84),
            27700 => Some(Self::BritishNationalGrid),
            3857 | 900913 => Some(Self::WebMercator),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub crs: Crs,
}

impl Point {
    /// `(longitude, latitude)` in decimal degrees.
    pub fn to_wgs84(&self) -> (f64, f64) {
        match self.crs {
            Crs::Wgs84 => (self.x, self.y),
            Crs::WebMercator => web_mercator_to_wgs84(self.x, self.y),
            Crs::BritishNationalGrid => {
                let (lat, lon) = grid_to_osgb36(self.x, self.y);
                let (lat, lon) = osgb36_to_wgs84(lat, lon);
                (lon.to_degrees(), lat.to_degrees())
            }
        }
    }
}

struct Ellipsoid {
    a: f64,
    b: f64,
}

impl Ellipsoid {
    fn e2(&self) -> f64 {
        1.0 - (self.b * self.b) / (self.a * self.a)
    }
}

const AIRY_1830: Ellipsoid = Ellipsoid {
    a: 6_377_563.396,
    b: 6_356_256.909,
};

const WGS84: Ellipsoid = Ellipsoid {
    a: 6_378_137.0,
    b: 6_356_752.314_245,
};

const GRID_SCALE: f64 = 0.999_601_271_7;
const GRID_FALSE_EASTING: f64 = 400_000.0;
const GRID_FALSE_NORTHING: f64 = -100_000.0;
const GRID_ORIGIN_LAT_DEG: f64 = 49.0;
const GRID_ORIGIN_LON_DEG: f64 = -2.0;

const WEB_MERCATOR_RADIUS: f64 = 6_378_137.0;

fn web_mercator_to_wgs84(x: f64, y: f64) -> (f64, f64) {
    let lon = (x / WEB_MERCATOR_RADIUS).to_degrees();
    let lat = (2.0 * (y / WEB_MERCATOR_RADIUS).exp().atan() - PI / 2.0).to_degrees();
    (lon, lat)
}

fn meridional_arc(lat: f64, lat0: f64) -> f64 {
    let Ellipsoid { a, b } = AIRY_1830;
    let n = (a - b) / (a + b);
    let (n2, n3) = (n * n, n * n * n);
    let (dlat, slat) = (lat - lat0, lat + lat0);

    b * GRID_SCALE
        * ((1.0 + n + 1.25 * n2 + 1.25 * n3) * dlat
            - (3.0 * n + 3.0 * n2 + 2.625 * n3) * dlat.sin() * slat.cos()
            + (1.875 * n2 + 1.875 * n3) * (2.0 * dlat).sin() * (2.0 * slat).cos()
            - (35.0 / 24.0) * n3 * (3.0 * dlat).sin() * (3.0 * slat).cos())
}

/// Easting/northing to OSGB36 latitude/longitude in radians.
fn grid_to_osgb36(easting: f64, northing: f64) -> (f64, f64) {
    let a = AIRY_1830.a;
    let e2 = AIRY_1830.e2();
    let lat0 = GRID_ORIGIN_LAT_DEG.to_radians();
    let lon0 = GRID_ORIGIN_LON_DEG.to_radians();

    let mut lat = lat0;
    let mut arc = 0.0;
    for _ in 0..64 {
        lat += (northing - GRID_FALSE_NORTHING - arc) / (a * GRID_SCALE);
        arc = meridional_arc(lat, lat0);
        if (northing - GRID_FALSE_NORTHING - arc).abs() < 1e-5 {
            break;
        }
    }

    let sin_lat = lat.sin();
    let nu = a * GRID_SCALE / (1.0 - e2 * sin_lat * sin_lat).sqrt();
    let rho = a * GRID_SCALE * (1.0 - e2) / (1.0 - e2 * sin_lat * sin_lat).powf(1.5);
    let eta2 = nu / rho - 1.0;

    let tan_lat = lat.tan();
    let (t2, t4, t6) = (tan_lat.powi(2), tan_lat.powi(4), tan_lat.powi(6));
    let sec_lat = 1.0 / lat.cos();

    let vii = tan_lat / (2.0 * rho * nu);
    let viii = tan_lat / (24.0 * rho * nu.powi(3)) * (5.0 + 3.0 * t2 + eta2 - 9.0 * t2 * eta2);
    let ix = tan_lat / (720.0 * rho * nu.powi(5)) * (61.0 + 90.0 * t2 + 45.0 * t4);
    let x = sec_lat / nu;
    let xi = sec_lat / (6.0 * nu.powi(3)) * (nu / rho + 2.0 * t2);
    let xii = sec_lat / (120.0 * nu.powi(5)) * (5.0 + 28.0 * t2 + 24.0 * t4);
    let xiia = sec_lat / (5040.0 * nu.powi(7)) * (61.0 + 662.0 * t2 + 1320.0 * t4 + 720.0 * t6);

    let de = easting - GRID_FALSE_EASTING;
    let lat = lat - vii * de.powi(2) + viii * de.powi(4) - ix * de.powi(6);
    let lon = lon0 + x * de - xi * de.powi(3) + xii * de.powi(5) - xiia * de.powi(7);
    (lat, lon)
}

/// OSGB36 to WGS84 latitude/longitude, radians in and out.
fn osgb36_to_wgs84(lat: f64, lon: f64) -> (f64, f64) {
    let (x, y, z) = to_cartesian(&AIRY_1830, lat, lon);

    let (tx, ty, tz) = (446.448, -125.157, 542.060);
    let scale = 1.0 + (-20.4894e-6);
    let rx = (0.1502 / 3600.0_f64).to_radians();
    let ry = (0.2470 / 3600.0_f64).to_radians();
    let rz = (0.8421 / 3600.0_f64).to_radians();

    let x2 = tx + scale * x - rz * y + ry * z;
    let y2 = ty + rz * x + scale * y - rx * z;
    let z2 = tz - ry * x + rx * y + scale * z;

    from_cartesian(&WGS84, x2, y2, z2)
}

fn to_cartesian(ellipsoid: &Ellipsoid, lat: f64, lon: f64) -> (f64, f64, f64) {
    let e2 = ellipsoid.e2();
    let nu = ellipsoid.a / (1.0 - e2 * lat.sin().powi(2)).sqrt();
    (
        nu * lat.cos() * lon.cos(),
        nu * lat.cos() * lon.sin(),
        (1.0 - e2) * nu * lat.sin(),
    )
}

fn from_cartesian(ellipsoid: &Ellipsoid, x: f64, y: f64, z: f64) -> (f64, f64) {
    let e2 = ellipsoid.e2();
    let p = (x * x + y * y).sqrt();
    let mut lat = z.atan2(p * (1.0 - e2));
    for _ in 0..16 {
        let nu = ellipsoid.a / (1.0 - e2 * lat.sin().powi(2)).sqrt();
        let next = (z + e2 * nu * lat.sin()).atan2(p);
        if (next - lat).abs() < 1e-12 {
            lat = next;
            break;
        }
        lat = next;
    }
    (lat, y.atan2(x))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_inverse_matches_ordnance_survey_worked_example() {
        // OS "A Guide to Coordinate Systems in Great Britain", Annex C.
        let (lat, lon) = grid_to_osgb36(651_409.903, 313_177.270);
        let expected_lat = 52.0 + 39.0 / 60.0 + 27.2531 / 3600.0;
        let expected_lon = 1.0 + 43.0 / 60.0 + 4.5177 / 3600.0;
        assert!((lat.to_degrees() - expected_lat).abs() < 1e-6);
        assert!((lon.to_degrees() - expected_lon).abs() < 1e-6);
    }

    #[test]
    fn helmert_shift_moves_a_few_arc_seconds() {
        let point = Point {
            x: 651_409.903,
            y: 313_177.270,
            crs: Crs::BritishNationalGrid,
        };
        let (lon, lat) = point.to_wgs84();
        assert!((lat - 52.6576).abs() < 0.002, "latitude {lat}");
        assert!((lon - 1.7179).abs() < 0.003, "longitude {lon}");
    }

    #[test]
    fn web_mercator_origin_and_extent() {
        let origin = Point {
            x: 0.0,
            y: 0.0,
            crs: Crs::WebMercator,
        };
        let (lon, lat) = origin.to_wgs84();
        assert!(lon.abs() < 1e-12 && lat.abs() < 1e-12);

        let east = Point {
            x: PI * WEB_MERCATOR_RADIUS,
            y: 0.0,
            crs: Crs::WebMercator,
        };
        let (lon, _) = east.to_wgs84();
        assert!((lon - 180.0).abs() < 1e-9);
    }

    #[test]
    fn wgs84_passes_through() {
        let point = Point {
            x: -0.1246,
            y: 51.5308,
            crs: Crs::Wgs84,
        };
        assert_eq!(point.to_wgs84(), (-0.1246, 51.5308));
    }

    #[test]
    fn unknown_srs_is_rejected() {
        assert_eq!(Crs::from_srs_id(27700), Some(Crs::BritishNationalGrid));
        assert_eq!(Crs::from_srs_id(2157), None);
    }
}

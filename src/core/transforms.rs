//! Coordinate reference systems and reprojection.
//!
//! Sensor points are always expressed in WGS84 geographic coordinates.
//! Boundary files arrive in whatever CRS their publisher used; UK ward
//! shapefiles are typically on the British National Grid. This module moves
//! coordinates between the supported systems through WGS84.

use std::fmt;

use geo::{Coord, MapCoords, MultiPolygon};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while resolving a CRS.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CrsError {
    #[error("Unsupported CRS: {0}")]
    Unsupported(String),
}

static WKT_AUTHORITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"AUTHORITY\[\s*"EPSG"\s*,\s*"?(\d+)"?\s*\]"#).unwrap()
});

static WKT_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*(PROJCS|GEOGCS|PROJCRS|GEOGCRS)\[\s*"([^"]*)""#).unwrap()
});

/// Supported coordinate reference systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Crs {
    /// Geographic longitude/latitude on WGS84.
    #[serde(rename = "EPSG:4326")]
    Wgs84,
    /// Spherical Web Mercator, metres.
    #[serde(rename = "EPSG:3857")]
    WebMercator,
    /// Ordnance Survey National Grid (OSGB36 transverse Mercator), metres.
    #[serde(rename = "EPSG:27700")]
    BritishNationalGrid,
}

impl Crs {
    /// EPSG code of this CRS.
    pub fn epsg(self) -> u32 {
        match self {
            Crs::Wgs84 => 4326,
            Crs::WebMercator => 3857,
            Crs::BritishNationalGrid => 27700,
        }
    }

    pub fn from_epsg(code: u32) -> Result<Self, CrsError> {
        match code {
            4326 => Ok(Crs::Wgs84),
            3857 | 900913 => Ok(Crs::WebMercator),
            27700 => Ok(Crs::BritishNationalGrid),
            other => Err(CrsError::Unsupported(format!("EPSG:{other}"))),
        }
    }

    /// Parse an identifier such as `EPSG:27700`, `4326`, or an OGC URN.
    pub fn parse(identifier: &str) -> Result<Self, CrsError> {
        let trimmed = identifier.trim();
        let upper = trimmed.to_ascii_uppercase();

        if upper.ends_with("CRS84") {
            return Ok(Crs::Wgs84);
        }

        let code = upper
            .rsplit(':')
            .next()
            .and_then(|tail| tail.parse::<u32>().ok())
            .ok_or_else(|| CrsError::Unsupported(trimmed.to_string()))?;

        Self::from_epsg(code)
    }

    /// Infer the CRS from an ESRI/OGC WKT string (the content of a `.prj`).
    ///
    /// The outermost `AUTHORITY["EPSG", ...]` wins when present; otherwise the
    /// coordinate system name is matched against the known systems.
    pub fn from_wkt(wkt: &str) -> Result<Self, CrsError> {
        // In WKT1 the top-level authority is the last one in the string.
        if let Some(code) = WKT_AUTHORITY
            .captures_iter(wkt)
            .last()
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<u32>().ok())
        {
            if let Ok(crs) = Self::from_epsg(code) {
                return Ok(crs);
            }
        }

        let caps = WKT_NAME
            .captures(wkt)
            .ok_or_else(|| CrsError::Unsupported("unrecognised WKT".to_string()))?;
        let kind = caps.get(1).map_or("", |m| m.as_str());
        let cs_name = caps
            .get(2)
            .map_or(String::new(), |m| m.as_str().to_ascii_lowercase())
            .replace(['_', '-', ' '], "");

        let projected = kind.starts_with("PROJ");
        if projected && cs_name.contains("britishnationalgrid") {
            Ok(Crs::BritishNationalGrid)
        } else if projected
            && (cs_name.contains("pseudomercator")
                || cs_name.contains("webmercator")
                || cs_name.contains("popularvisualisation"))
        {
            Ok(Crs::WebMercator)
        } else if !projected && (cs_name.contains("wgs1984") || cs_name.contains("wgs84")) {
            Ok(Crs::Wgs84)
        } else {
            Err(CrsError::Unsupported(caps[2].to_string()))
        }
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

#[derive(Debug, Clone, Copy)]
struct Ellipsoid {
    a: f64,
    b: f64,
}

impl Ellipsoid {
    fn e2(&self) -> f64 {
        1.0 - (self.b * self.b) / (self.a * self.a)
    }

    fn ep2(&self) -> f64 {
        (self.a * self.a - self.b * self.b) / (self.b * self.b)
    }
}

const WGS84: Ellipsoid = Ellipsoid {
    a: 6_378_137.0,
    b: 6_356_752.314_245,
};

const AIRY_1830: Ellipsoid = Ellipsoid {
    a: 6_377_563.396,
    b: 6_356_256.909,
};

/// Radius of the Web Mercator sphere (metres).
const MERCATOR_RADIUS: f64 = 6_378_137.0;

/// Latitude limit of the square Web Mercator world.
const MERCATOR_MAX_LAT: f64 = 85.051_128_779_806_59;

/// Transverse Mercator projection parameters.
#[derive(Debug, Clone, Copy)]
struct TransverseMercator {
    ellipsoid: Ellipsoid,
    scale: f64,
    lat0_deg: f64,
    lon0_deg: f64,
    false_easting: f64,
    false_northing: f64,
}

const NATIONAL_GRID: TransverseMercator = TransverseMercator {
    ellipsoid: AIRY_1830,
    scale: 0.999_601_271_7,
    lat0_deg: 49.0,
    lon0_deg: -2.0,
    false_easting: 400_000.0,
    false_northing: -100_000.0,
};

impl TransverseMercator {
    fn meridional_arc(&self, lat: f64) -> f64 {
        let Ellipsoid { a, b } = self.ellipsoid;
        let n = (a - b) / (a + b);
        let n2 = n * n;
        let n3 = n2 * n;
        let lat0 = self.lat0_deg.to_radians();
        let d = lat - lat0;
        let s = lat + lat0;

        b * self.scale
            * ((1.0 + n + 1.25 * n2 + 1.25 * n3) * d
                - (3.0 * n + 3.0 * n2 + 21.0 / 8.0 * n3) * d.sin() * s.cos()
                + (15.0 / 8.0 * n2 + 15.0 / 8.0 * n3) * (2.0 * d).sin() * (2.0 * s).cos()
                - 35.0 / 24.0 * n3 * (3.0 * d).sin() * (3.0 * s).cos())
    }

    /// Radii of curvature (nu, rho) and eta squared at `lat`.
    fn curvature(&self, lat: f64) -> (f64, f64, f64) {
        let a = self.ellipsoid.a;
        let e2 = self.ellipsoid.e2();
        let sin2 = lat.sin() * lat.sin();
        let nu = a * self.scale / (1.0 - e2 * sin2).sqrt();
        let rho = a * self.scale * (1.0 - e2) / (1.0 - e2 * sin2).powf(1.5);
        (nu, rho, nu / rho - 1.0)
    }

    /// Geodetic degrees on the projection ellipsoid to (easting, northing).
    fn forward(&self, lon_deg: f64, lat_deg: f64) -> (f64, f64) {
        let lat = lat_deg.to_radians();
        let (nu, rho, eta2) = self.curvature(lat);
        let m = self.meridional_arc(lat);

        let (sin, cos) = lat.sin_cos();
        let tan2 = lat.tan().powi(2);
        let tan4 = tan2 * tan2;

        let i = m + self.false_northing;
        let ii = nu / 2.0 * sin * cos;
        let iii = nu / 24.0 * sin * cos.powi(3) * (5.0 - tan2 + 9.0 * eta2);
        let iiia = nu / 720.0 * sin * cos.powi(5) * (61.0 - 58.0 * tan2 + tan4);
        let iv = nu * cos;
        let v = nu / 6.0 * cos.powi(3) * (nu / rho - tan2);
        let vi = nu / 120.0
            * cos.powi(5)
            * (5.0 - 18.0 * tan2 + tan4 + 14.0 * eta2 - 58.0 * tan2 * eta2);

        let dl = (lon_deg - self.lon0_deg).to_radians();
        let northing = i + ii * dl.powi(2) + iii * dl.powi(4) + iiia * dl.powi(6);
        let easting = self.false_easting + iv * dl + v * dl.powi(3) + vi * dl.powi(5);
        (easting, northing)
    }

    /// (easting, northing) to geodetic degrees on the projection ellipsoid.
    fn inverse(&self, easting: f64, northing: f64) -> (f64, f64) {
        let a = self.ellipsoid.a;
        let mut lat = self.lat0_deg.to_radians();
        let mut m = 0.0;

        for _ in 0..64 {
            lat += (northing - self.false_northing - m) / (a * self.scale);
            m = self.meridional_arc(lat);
            if (northing - self.false_northing - m).abs() < 1e-5 {
                break;
            }
        }

        let (nu, rho, eta2) = self.curvature(lat);
        let tan = lat.tan();
        let tan2 = tan * tan;
        let tan4 = tan2 * tan2;
        let tan6 = tan4 * tan2;
        let sec = 1.0 / lat.cos();

        let vii = tan / (2.0 * rho * nu);
        let viii = tan / (24.0 * rho * nu.powi(3)) * (5.0 + 3.0 * tan2 + eta2 - 9.0 * tan2 * eta2);
        let ix = tan / (720.0 * rho * nu.powi(5)) * (61.0 + 90.0 * tan2 + 45.0 * tan4);
        let x = sec / nu;
        let xi = sec / (6.0 * nu.powi(3)) * (nu / rho + 2.0 * tan2);
        let xii = sec / (120.0 * nu.powi(5)) * (5.0 + 28.0 * tan2 + 24.0 * tan4);
        let xiia = sec / (5040.0 * nu.powi(7)) * (61.0 + 662.0 * tan2 + 1320.0 * tan4 + 720.0 * tan6);

        let de = easting - self.false_easting;
        let lat_out = lat - vii * de.powi(2) + viii * de.powi(4) - ix * de.powi(6);
        let lon_out = self.lon0_deg.to_radians() + x * de - xi * de.powi(3) + xii * de.powi(5)
            - xiia * de.powi(7);

        (lon_out.to_degrees(), lat_out.to_degrees())
    }
}

/// Seven-parameter (position vector) datum shift.
#[derive(Debug, Clone, Copy)]
struct Helmert {
    tx: f64,
    ty: f64,
    tz: f64,
    /// Rotations in arc-seconds.
    rx: f64,
    ry: f64,
    rz: f64,
    /// Scale in parts per million.
    s_ppm: f64,
}

const OSGB36_TO_WGS84: Helmert = Helmert {
    tx: 446.448,
    ty: -125.157,
    tz: 542.060,
    rx: 0.1502,
    ry: 0.2470,
    rz: 0.8421,
    s_ppm: -20.4894,
};

impl Helmert {
    fn inverse(&self) -> Helmert {
        Helmert {
            tx: -self.tx,
            ty: -self.ty,
            tz: -self.tz,
            rx: -self.rx,
            ry: -self.ry,
            rz: -self.rz,
            s_ppm: -self.s_ppm,
        }
    }

    fn apply(&self, [x, y, z]: [f64; 3]) -> [f64; 3] {
        let rx = (self.rx / 3600.0).to_radians();
        let ry = (self.ry / 3600.0).to_radians();
        let rz = (self.rz / 3600.0).to_radians();
        let s1 = 1.0 + self.s_ppm * 1e-6;
        [
            self.tx + s1 * x - rz * y + ry * z,
            self.ty + rz * x + s1 * y - rx * z,
            self.tz - ry * x + rx * y + s1 * z,
        ]
    }
}

fn geodetic_to_ecef(ellipsoid: Ellipsoid, lon_deg: f64, lat_deg: f64) -> [f64; 3] {
    let (sin_lat, cos_lat) = lat_deg.to_radians().sin_cos();
    let (sin_lon, cos_lon) = lon_deg.to_radians().sin_cos();
    let e2 = ellipsoid.e2();
    let n = ellipsoid.a / (1.0 - e2 * sin_lat * sin_lat).sqrt();
    [
        n * cos_lat * cos_lon,
        n * cos_lat * sin_lon,
        n * (1.0 - e2) * sin_lat,
    ]
}

/// Bowring's closed form; height is discarded.
fn ecef_to_geodetic(ellipsoid: Ellipsoid, [x, y, z]: [f64; 3]) -> (f64, f64) {
    let Ellipsoid { a, b } = ellipsoid;
    let p = (x * x + y * y).sqrt();
    let lon = y.atan2(x);

    let theta = (z * a).atan2(p * b);
    let (sin_t, cos_t) = theta.sin_cos();
    let lat = (z + ellipsoid.ep2() * b * sin_t.powi(3)).atan2(p - ellipsoid.e2() * a * cos_t.powi(3));

    (lon.to_degrees(), lat.to_degrees())
}

fn national_grid_to_wgs84(easting: f64, northing: f64) -> (f64, f64) {
    let (lon, lat) = NATIONAL_GRID.inverse(easting, northing);
    let ecef = OSGB36_TO_WGS84.apply(geodetic_to_ecef(AIRY_1830, lon, lat));
    ecef_to_geodetic(WGS84, ecef)
}

fn wgs84_to_national_grid(lon: f64, lat: f64) -> (f64, f64) {
    let ecef = OSGB36_TO_WGS84.inverse().apply(geodetic_to_ecef(WGS84, lon, lat));
    let (lon36, lat36) = ecef_to_geodetic(AIRY_1830, ecef);
    NATIONAL_GRID.forward(lon36, lat36)
}

/// Convert a coordinate in `crs` to WGS84 (x = longitude, y = latitude).
pub fn to_wgs84(crs: Crs, coord: Coord<f64>) -> Coord<f64> {
    match crs {
        Crs::Wgs84 => coord,
        Crs::WebMercator => {
            let lon = (coord.x / MERCATOR_RADIUS).to_degrees();
            let lat = (2.0 * (coord.y / MERCATOR_RADIUS).exp().atan() - std::f64::consts::FRAC_PI_2)
                .to_degrees();
            Coord { x: lon, y: lat }
        }
        Crs::BritishNationalGrid => {
            let (x, y) = national_grid_to_wgs84(coord.x, coord.y);
            Coord { x, y }
        }
    }
}

/// Convert a WGS84 coordinate (x = longitude, y = latitude) into `crs`.
pub fn from_wgs84(crs: Crs, coord: Coord<f64>) -> Coord<f64> {
    match crs {
        Crs::Wgs84 => coord,
        Crs::WebMercator => {
            let lat = coord.y.clamp(-MERCATOR_MAX_LAT, MERCATOR_MAX_LAT).to_radians();
            Coord {
                x: MERCATOR_RADIUS * coord.x.to_radians(),
                y: MERCATOR_RADIUS * (std::f64::consts::FRAC_PI_4 + lat / 2.0).tan().ln(),
            }
        }
        Crs::BritishNationalGrid => {
            let (x, y) = wgs84_to_national_grid(coord.x, coord.y);
            Coord { x, y }
        }
    }
}

/// Reproject a single coordinate between two systems.
pub fn reproject_coord(from: Crs, to: Crs, coord: Coord<f64>) -> Coord<f64> {
    if from == to {
        return coord;
    }
    from_wgs84(to, to_wgs84(from, coord))
}

/// Reproject every vertex of a multipolygon.
pub fn reproject_multi_polygon(
    geometry: &MultiPolygon<f64>,
    from: Crs,
    to: Crs,
) -> MultiPolygon<f64> {
    if from == to {
        return geometry.clone();
    }
    geometry.map_coords(|c| reproject_coord(from, to, c))
}

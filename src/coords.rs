/// Coordinate reference system handling and the fixed-point header encoding
///
/// Geographic (lat/lon) navigation fixes are projected to a planar CRS before
/// they are written into trace headers. WGS84 UTM zones are handled natively;
/// any other CRS is delegated to the PROJ command line tools.

/// The SourceGroupScalar written alongside encoded coordinates. Negative
/// means "divide", so -100 recovers metres from integer centimetres.
pub const COORD_SCALAR: i16 = -100;

#[derive(Debug, Copy, Clone)]
pub struct Coord {
    pub x: f64,
    pub y: f64,
}

impl Coord {
    /// Interpret the coordinate as (lon, lat) and find its geomorph equivalent
    fn to_geomorph_coord(&self) -> geomorph::coord::Coord {
        geomorph::coord::Coord {
            lat: self.y,
            lon: self.x,
        }
    }

    fn to_geomorph_utm(&self, crs: &UtmCrs) -> geomorph::utm::Utm {
        let band = match crs.north {
            true => 'N',
            false => 'S',
        };
        geomorph::utm::Utm {
            easting: self.x,
            northing: self.y,
            north: crs.north,
            zone: crs.zone as i32,
            band,
            ups: false,
        }
    }

    fn to_wgs84(&self, crs: &UtmCrs) -> Self {
        let crd: geomorph::coord::Coord = self.to_geomorph_utm(crs).into();
        Self {
            x: crd.lon,
            y: crd.lat,
        }
    }

    fn from_wgs84(&self, crs: &UtmCrs) -> Self {
        let (mut northing, easting, _) = utm::to_utm_wgs84(self.y, self.x, crs.zone as u8);

        // Edge case exceptions since the utm crate doesn't care about N/S
        if !crs.north & (self.y > 0.) {
            northing += 10000000.;
        } else if crs.north & (self.y < 0.) {
            northing -= 10000000.;
        }

        Self {
            x: easting,
            y: northing,
        }
    }
}

/// Encode a planar coordinate as a fixed-point header integer
///
/// Two decimal places are retained and the decimal point is removed, so
/// metres become whole centimetres. Truncation (not rounding) toward zero
/// keeps the historical behavior of the surveys this repairs.
pub fn encode_fixed_point(value: f64) -> i32 {
    (value * 100.).trunc() as i32
}

/// The inverse of [`encode_fixed_point`], given the -100 scalar
pub fn decode_fixed_point(value: i32) -> f64 {
    value as f64 / 100.
}

#[derive(Debug, Eq, PartialEq)]
pub struct UtmCrs {
    pub zone: usize,
    pub north: bool,
}

impl UtmCrs {
    /// Find the UTM zone that a (lon, lat) coordinate natively belongs in
    pub fn optimal_crs(coord: &Coord) -> Self {
        let utm: geomorph::utm::Utm = coord.to_geomorph_coord().into();
        Self {
            zone: utm.zone as usize,
            north: utm.north,
        }
    }

    pub fn to_epsg_str(&self) -> String {
        let mut epsg = "EPSG:32".to_string();

        if self.north {
            epsg += "6";
        } else {
            epsg += "8";
        }
        epsg += &format!("{}", self.zone);
        epsg
    }
}

#[derive(Debug, Eq, PartialEq)]
pub enum Crs {
    Utm(UtmCrs),
    Proj(String),
}

impl Crs {
    /// Parse a user-given CRS string
    ///
    /// WGS84 UTM zones ("EPSG:32633", "WGS84 UTM Zone 33N") are recognized
    /// internally. Anything else is resolved through `projinfo`, and stays a
    /// PROJ string unless that in turn describes a WGS84 UTM zone.
    pub fn from_user_input(text: &str) -> Result<Self, String> {
        let utm_result = parse_crs_utm(text);
        if let Ok(utm) = utm_result {
            return Ok(Self::Utm(utm));
        }
        let proj_result = proj_parse_crs(text);

        if let Ok(proj_str) = proj_result {
            if proj_str.contains("+proj=utm")
                & proj_str.contains("+zone=")
                & proj_str.contains("+datum=WGS84")
            {
                if let Some(zone_str) = proj_str.split("+zone=").last().and_then(|s| s.split(' ').next()) {
                    if let Ok(utm_zone) = zone_str.parse::<usize>() {
                        return Ok(Crs::Utm(UtmCrs {
                            zone: utm_zone,
                            north: !proj_str.contains("+south"),
                        }));
                    }
                }
            }

            return Ok(Crs::Proj(proj_str));
        }

        Err(format!(
            "Could not read CRS.\nInternal error: {}.\nProj error: {}",
            utm_result.err().unwrap(),
            proj_result.err().unwrap()
        ))
    }

    pub fn name(&self) -> String {
        match self {
            Crs::Utm(utm) => utm.to_epsg_str(),
            Crs::Proj(proj_str) => proj_str.clone(),
        }
    }
}

fn parse_crs_utm(text: &str) -> Result<UtmCrs, String> {
    let parts = text
        .to_lowercase()
        .trim()
        .split_whitespace()
        .map(|s| s.to_string())
        .collect::<Vec<String>>();

    if let Some(first) = parts.first() {
        // Try EPSG:32XXX format
        if first.contains("epsg") {
            let code = first.replace(':', "").replace("epsg", "");
            if !code.starts_with("32") | (code.len() != 5) {
                return Err(format!("EPSG code is not a WGS84 UTM zone: {text}"));
            }

            let (north, start) = match code.chars().nth(2) {
                Some('6') => Ok((true, "326")),
                Some('8') => Ok((false, "328")),
                _ => Err(format!("EPSG code is not a WGS84 UTM zone: {text}")),
            }?;

            if let Ok(zone) = code.replace(start, "").parse::<usize>() {
                return Ok(UtmCrs { zone, north });
            }
        };

        // Try "WGS84 UTM Zone 33 N" format
        if ["wgs84", "wgs1984"].iter().any(|s| first.starts_with(s)) {
            if let Some(mut zone_number) = parts.get(3).map(|v| v.to_string()) {
                let mut north_south: Option<bool> = None;
                if zone_number.contains('n') {
                    north_south = Some(true);
                    zone_number = zone_number.replace('n', "");
                } else if zone_number.contains('s') {
                    north_south = Some(false);
                    zone_number = zone_number.replace('s', "");
                }

                if north_south.is_none() {
                    if let Some(n_s) = parts.get(4) {
                        if n_s.contains('n') {
                            north_south = Some(true);
                        } else if n_s.contains('s') {
                            north_south = Some(false);
                        }
                    }
                }
                if let Ok(number) = zone_number.parse::<usize>() {
                    if let Some(north) = north_south {
                        return Ok(UtmCrs {
                            zone: number,
                            north,
                        });
                    } else {
                        return Err(format!("UTM zone letter not provided or invalid: {text}"));
                    }
                }
            }
        } else {
            return Err(format!("CRS parse error. No 'WGS84' string in {text}"));
        }
    } else {
        return Err(format!("CRS parse error. No whitespaces in {text}"));
    }

    Err(format!("CRS parse error: {text}"))
}

fn proj_parse_crs(text: &str) -> Result<String, String> {
    use std::io::BufRead;
    let mut child = std::process::Command::new("projinfo")
        .arg(text)
        .stdout(std::process::Stdio::piped())
        .spawn()
        .map_err(|e| format!("Could not spawn projinfo: {e}"))?;

    let stdout = child.stdout.take().ok_or("Failed to open projinfo stdout")?;
    let reader = std::io::BufReader::new(stdout);

    let mut output = String::new();
    // The PROJ.4 definition is on the line after the "PROJ.4 string:" marker
    let mut next = false;
    for line in reader.lines() {
        let line = line.map_err(|e| format!("Error reading projinfo output: {e}"))?;
        if next {
            output.push_str(line.trim());
            break;
        };
        if line.starts_with("PROJ.4 string:") {
            next = true;
        }
    }

    let _ = child.wait();

    match next {
        false => Err("Could not find proj string for given CRS.".into()),
        true => match output.is_empty() {
            true => Err("Proj string was empty.".into()),
            false => Ok(output),
        },
    }
}

fn proj_convert_from_wgs84(x: &[f64], y: &[f64], crs: &str) -> Result<Vec<Coord>, String> {
    proj_convert_crs(x, y, "+init=epsg:4326", crs)
}

fn proj_convert_crs(x: &[f64], y: &[f64], src_crs: &str, dst_crs: &str) -> Result<Vec<Coord>, String> {
    let mut new_coords = Vec::<Coord>::new();

    use std::io::BufRead;
    use std::io::Write;
    let proj_conv_str = format!("{src_crs} +to {dst_crs} -f %.4f")
        .split(' ')
        .map(|s| s.to_string())
        .collect::<Vec<String>>();
    let mut child = std::process::Command::new("cs2cs")
        .args(proj_conv_str)
        .stdout(std::process::Stdio::piped())
        .stdin(std::process::Stdio::piped())
        .spawn()
        .map_err(|e| format!("Could not spawn cs2cs: {e}"))?;

    let mut stdin = child.stdin.take().ok_or("Failed to open cs2cs stdin")?;

    let mut values = Vec::<String>::new();
    for i in 0..x.len() {
        values.push(format!("{} {}", x[i], y[i]));
    }

    stdin
        .write_all((values.join("\n") + "\n").as_bytes())
        .map_err(|e| format!("Error writing to cs2cs: {e}"))?;
    let stdout = child.stdout.take().ok_or("Failed to open cs2cs stdout")?;
    let reader = std::io::BufReader::new(stdout);
    for line in reader.lines() {
        let line = line.map_err(|e| format!("Error reading cs2cs output: {e}"))?;

        let values: Vec<f64> = line
            .split_whitespace()
            .filter_map(|s| s.trim().parse::<f64>().ok())
            .collect();

        if values.len() < 2 {
            return Err(format!("Unparseable cs2cs output line: {line}"));
        }

        new_coords.push(Coord {
            x: values[0],
            y: values[1],
        });

        if new_coords.len() == x.len() {
            break;
        };
    }

    child.kill().map_err(|e| format!("Error stopping cs2cs: {e}"))?;
    Ok(new_coords)
}

/// Project WGS84 (lon, lat) coordinates to the given planar CRS
pub fn from_wgs84(coords: &[Coord], crs: &Crs) -> Result<Vec<Coord>, String> {
    let mut new_coords = Vec::<Coord>::new();
    match crs {
        Crs::Utm(utm) => {
            for coord in coords {
                new_coords.push(coord.from_wgs84(utm));
            }
        }
        Crs::Proj(proj_str) => {
            let mut eastings = Vec::<f64>::new();
            let mut northings = eastings.clone();

            for coord in coords {
                eastings.push(coord.x);
                northings.push(coord.y);
            }
            new_coords.append(&mut proj_convert_from_wgs84(&eastings, &northings, proj_str)?);
        }
    }

    Ok(new_coords)
}

/// Unproject planar coordinates back to WGS84 (lon, lat)
pub fn to_wgs84(coords: &[Coord], crs: &Crs) -> Result<Vec<Coord>, String> {
    let mut new_coords = Vec::<Coord>::new();
    match crs {
        Crs::Utm(utm) => {
            for coord in coords {
                new_coords.push(coord.to_wgs84(utm));
            }
        }
        Crs::Proj(proj_str) => {
            let mut eastings = Vec::<f64>::new();
            let mut northings = eastings.clone();

            for coord in coords {
                eastings.push(coord.x);
                northings.push(coord.y);
            }
            new_coords.append(&mut proj_convert_crs(&eastings, &northings, proj_str, "+init=epsg:4326")?);
        }
    }

    Ok(new_coords)
}

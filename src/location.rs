/// IEC located-variable addresses and the compiler manifest
///
/// A location token has the shape `%<area><width><index>[.<bit>]`, e.g.
/// `%IX0.1`, `%QW10`, `%MD954`. Bit-width locations (`X`) carry a
/// mandatory bit index in `[0,8)`; every other width forbids the dot.
///
/// The compiler emits one `__LOCATED_VAR(...)` record per located
/// variable into `LOCATED_VARIABLES.h`; parsing is line-oriented and
/// whitespace-tolerant, and lines without the marker are ignored.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};
use crate::scalar::ScalarType;

/// File name of the compiler-emitted manifest
pub const MANIFEST_FILE_NAME: &str = "LOCATED_VARIABLES.h";

/// Marker that identifies a located-variable record
pub const MANIFEST_MARKER: &str = "__LOCATED_VAR(";

/// Fixed list of relative paths probed for the manifest
pub const MANIFEST_SEARCH_PATHS: [&str; 6] = [
    "LOCATED_VARIABLES.h",
    "./LOCATED_VARIABLES.h",
    "core/LOCATED_VARIABLES.h",
    "./core/LOCATED_VARIABLES.h",
    "../core/LOCATED_VARIABLES.h",
    "../LOCATED_VARIABLES.h",
];

/// Process-image memory area
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Area {
    /// `%I` — inputs, refreshed by the scan engine before the program body
    Input,
    /// `%Q` — outputs, committed by the scan engine after the program body
    Output,
    /// `%M` — internal memory
    Memory,
}

impl Area {
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'I' => Some(Area::Input),
            'Q' => Some(Area::Output),
            'M' => Some(Area::Memory),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Area::Input => 'I',
            Area::Output => 'Q',
            Area::Memory => 'M',
        }
    }
}

/// Location width glyph, fixing the scalar type of the slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Width {
    /// Single bit
    X,
    /// 8-bit
    B,
    /// 16-bit
    W,
    /// 32-bit
    D,
    /// 64-bit
    L,
    /// binary32
    R,
    /// binary64
    F,
}

impl Width {
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'X' => Some(Width::X),
            'B' => Some(Width::B),
            'W' => Some(Width::W),
            'D' => Some(Width::D),
            'L' => Some(Width::L),
            'R' => Some(Width::R),
            'F' => Some(Width::F),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Width::X => 'X',
            Width::B => 'B',
            Width::W => 'W',
            Width::D => 'D',
            Width::L => 'L',
            Width::R => 'R',
            Width::F => 'F',
        }
    }

    /// Scalar type fixed by this width glyph; widths are exact
    pub fn scalar_type(self) -> ScalarType {
        match self {
            Width::X => ScalarType::Boolean,
            Width::B => ScalarType::Byte,
            Width::W => ScalarType::UInt16,
            Width::D => ScalarType::UInt32,
            Width::L => ScalarType::UInt64,
            Width::R => ScalarType::Float,
            Width::F => ScalarType::Double,
        }
    }
}

/// A parsed located-variable address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Location {
    pub area: Area,
    pub width: Width,
    pub index: usize,
    /// Bit index in `[0,8)`, present exactly for width `X`
    pub bit: Option<u8>,
}

fn parse_index(digits: &str) -> Option<usize> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

impl FromStr for Location {
    type Err = BridgeError;

    fn from_str(token: &str) -> BridgeResult<Self> {
        let err = || BridgeError::invalid_location(token);

        let rest = token.strip_prefix('%').ok_or_else(err)?;
        let mut chars = rest.chars();
        let area = chars.next().and_then(Area::from_char).ok_or_else(err)?;
        let width = chars.next().and_then(Width::from_char).ok_or_else(err)?;
        let digits = chars.as_str();

        match width {
            Width::X => {
                let (index, bit) = digits.split_once('.').ok_or_else(err)?;
                let index = parse_index(index).ok_or_else(err)?;
                let bit = parse_index(bit)
                    .filter(|b| *b < 8)
                    .map(|b| b as u8)
                    .ok_or_else(err)?;
                Ok(Location {
                    area,
                    width,
                    index,
                    bit: Some(bit),
                })
            }
            _ => {
                if digits.contains('.') {
                    return Err(err());
                }
                let index = parse_index(digits).ok_or_else(err)?;
                Ok(Location {
                    area,
                    width,
                    index,
                    bit: None,
                })
            }
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.bit {
            Some(bit) => write!(
                f,
                "%{}{}{}.{}",
                self.area.as_char(),
                self.width.as_char(),
                self.index,
                bit
            ),
            None => write!(
                f,
                "%{}{}{}",
                self.area.as_char(),
                self.width.as_char(),
                self.index
            ),
        }
    }
}

/// One manifest record: IEC declaration, symbolic name, address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocatedVariable {
    /// IEC declaration type, informational only
    pub iec_type: String,
    /// Browse name, with the compiler's leading `__` stripped
    pub name: String,
    pub location: Location,
}

/// Result of scanning a manifest: resolved records, marker-line count and
/// the per-record errors that were skipped
#[derive(Debug, Clone, Default)]
pub struct ManifestScan {
    pub variables: Vec<LocatedVariable>,
    /// Number of lines that carried the record marker
    pub seen: usize,
    pub errors: Vec<BridgeError>,
    /// Path the manifest was read from, when read from a file
    pub source: Option<PathBuf>,
}

/// Parse a single manifest line
///
/// Returns `None` for lines without the record marker, `Some(Err)` for
/// marker lines that fail decomposition or address validation.
pub fn parse_manifest_line(line: &str) -> Option<BridgeResult<LocatedVariable>> {
    let trimmed = line.trim();
    let marker = trimmed.find(MANIFEST_MARKER)?;
    Some(parse_record(&trimmed[marker..]))
}

fn parse_record(record: &str) -> BridgeResult<LocatedVariable> {
    let malformed = || BridgeError::malformed_manifest(record.trim());

    let open = record.find('(').ok_or_else(malformed)?;
    let close = record.rfind(')').ok_or_else(malformed)?;
    if close <= open {
        return Err(malformed());
    }
    let fields: Vec<&str> = record[open + 1..close].split(',').map(str::trim).collect();
    if fields.len() < 5 {
        return Err(malformed());
    }

    let iec_type = fields[0].to_string();
    let name = fields[1].strip_prefix("__").unwrap_or(fields[1]).to_string();
    let area = fields[2].chars().next().ok_or_else(malformed)?;
    let width = fields[3].chars().next().ok_or_else(malformed)?;

    // Compose the canonical token and reuse the address parser, so bad
    // digits, bad glyphs and bit-range violations all classify the same
    // way as hand-written tokens.
    let token = if width == 'X' {
        let bit = fields.get(5).ok_or_else(malformed)?;
        format!("%{}X{}.{}", area, fields[4], bit)
    } else {
        format!("%{}{}{}", area, width, fields[4])
    };
    let location = token.parse()?;

    Ok(LocatedVariable {
        iec_type,
        name,
        location,
    })
}

/// Parse manifest text, collecting records and per-record errors
pub fn parse_manifest_text(text: &str) -> ManifestScan {
    let mut scan = ManifestScan::default();
    for line in text.lines() {
        match parse_manifest_line(line) {
            None => {}
            Some(Ok(variable)) => {
                scan.seen += 1;
                debug!(
                    "manifest record: {} {} at {}",
                    variable.iec_type, variable.name, variable.location
                );
                scan.variables.push(variable);
            }
            Some(Err(error)) => {
                scan.seen += 1;
                scan.errors.push(error);
            }
        }
    }
    scan
}

/// Read and parse a manifest file
pub fn parse_manifest_file<P: AsRef<Path>>(path: P) -> BridgeResult<ManifestScan> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    let mut scan = parse_manifest_text(&text);
    scan.source = Some(path.to_path_buf());
    Ok(scan)
}

/// Probe the fixed search list for a manifest file
pub fn locate_manifest() -> Option<PathBuf> {
    MANIFEST_SEARCH_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|path| path.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_parse_bit_location() {
        let loc: Location = "%IX0.1".parse().unwrap();
        assert_eq!(loc.area, Area::Input);
        assert_eq!(loc.width, Width::X);
        assert_eq!(loc.index, 0);
        assert_eq!(loc.bit, Some(1));
        assert_eq!(loc.to_string(), "%IX0.1");
    }

    #[test]
    fn test_parse_word_location() {
        let loc: Location = "%QW10".parse().unwrap();
        assert_eq!(loc.area, Area::Output);
        assert_eq!(loc.width, Width::W);
        assert_eq!(loc.index, 10);
        assert_eq!(loc.bit, None);

        let loc: Location = "%MD954".parse().unwrap();
        assert_eq!(loc.area, Area::Memory);
        assert_eq!(loc.width, Width::D);
        assert_eq!(loc.index, 954);
        assert_eq!(loc.to_string(), "%MD954");
    }

    #[test]
    fn test_reject_bad_tokens() {
        // Bit index out of range
        assert!("%IX0.8".parse::<Location>().is_err());
        // Negative index
        assert!("%MW-1".parse::<Location>().is_err());
        // Missing mandatory bit
        assert!("%IX3".parse::<Location>().is_err());
        // Dot on a non-bit width
        assert!("%QW1.2".parse::<Location>().is_err());
        // Unknown area / width glyphs
        assert!("%ZX0.0".parse::<Location>().is_err());
        assert!("%IY4".parse::<Location>().is_err());
        // Missing prefix, empty index
        assert!("IX0.0".parse::<Location>().is_err());
        assert!("%IW".parse::<Location>().is_err());
    }

    #[test]
    fn test_width_scalar_types() {
        assert_eq!(Width::X.scalar_type(), ScalarType::Boolean);
        assert_eq!(Width::B.scalar_type(), ScalarType::Byte);
        assert_eq!(Width::W.scalar_type(), ScalarType::UInt16);
        assert_eq!(Width::D.scalar_type(), ScalarType::UInt32);
        assert_eq!(Width::L.scalar_type(), ScalarType::UInt64);
        assert_eq!(Width::R.scalar_type(), ScalarType::Float);
        assert_eq!(Width::F.scalar_type(), ScalarType::Double);
    }

    #[test]
    fn test_parse_manifest_record() {
        let record = parse_manifest_line("__LOCATED_VAR(BOOL,__QX0_1,Q,X,0,1)")
            .unwrap()
            .unwrap();
        assert_eq!(record.iec_type, "BOOL");
        assert_eq!(record.name, "QX0_1");
        assert_eq!(record.location, "%QX0.1".parse().unwrap());
    }

    #[test]
    fn test_manifest_whitespace_tolerance() {
        let record = parse_manifest_line("  __LOCATED_VAR( UINT , __IW5 , I , W , 5 )")
            .unwrap()
            .unwrap();
        assert_eq!(record.name, "IW5");
        assert_eq!(record.location, "%IW5".parse().unwrap());
    }

    #[test]
    fn test_manifest_marker_filter() {
        assert!(parse_manifest_line("#ifndef LOCATED_VARIABLES_H").is_none());
        assert!(parse_manifest_line("").is_none());
        assert!(parse_manifest_line("// __LOCATED_VAR marker without call shape").is_none());
    }

    #[test]
    fn test_manifest_field_count() {
        // Four fields decompose short
        let result = parse_manifest_line("__LOCATED_VAR(BOOL,__QX0_1,Q,X)").unwrap();
        assert!(matches!(
            result,
            Err(BridgeError::MalformedManifest { .. })
        ));

        // Bit width without the sixth field
        let result = parse_manifest_line("__LOCATED_VAR(BOOL,__QX0_1,Q,X,0)").unwrap();
        assert!(matches!(
            result,
            Err(BridgeError::MalformedManifest { .. })
        ));

        // Missing closing parenthesis
        let result = parse_manifest_line("__LOCATED_VAR(BOOL,__QX0_1,Q,X,0,1").unwrap();
        assert!(matches!(
            result,
            Err(BridgeError::MalformedManifest { .. })
        ));
    }

    #[test]
    fn test_manifest_bad_address_classifies_as_location_error() {
        let result = parse_manifest_line("__LOCATED_VAR(BOOL,__QX0_9,Q,X,0,9)").unwrap();
        assert!(matches!(result, Err(BridgeError::InvalidLocation { .. })));

        let result = parse_manifest_line("__LOCATED_VAR(UINT,__IWX,I,W,abc)").unwrap();
        assert!(matches!(result, Err(BridgeError::InvalidLocation { .. })));
    }

    #[test]
    fn test_manifest_scan_counts() {
        let text = "\
#ifndef LOCATED_VARIABLES_H
__LOCATED_VAR(BOOL,__QX0_1,Q,X,0,1)
__LOCATED_VAR(UINT,__IW5,I,W,5)
__LOCATED_VAR(BOOL,__BROKEN,Q,X)
some unrelated line
";
        let scan = parse_manifest_text(text);
        assert_eq!(scan.seen, 3);
        assert_eq!(scan.variables.len(), 2);
        assert_eq!(scan.errors.len(), 1);
    }

    #[test]
    fn test_manifest_reparse_is_idempotent() {
        let text = "\
__LOCATED_VAR(BOOL,__QX0_1,Q,X,0,1)
__LOCATED_VAR(UINT,__IW5,I,W,5)
__LOCATED_VAR(REAL,__MR2,M,R,2)
";
        let first: BTreeSet<Location> = parse_manifest_text(text)
            .variables
            .iter()
            .map(|v| v.location)
            .collect();
        let second: BTreeSet<Location> = parse_manifest_text(text)
            .variables
            .iter()
            .map(|v| v.location)
            .collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
    }
}

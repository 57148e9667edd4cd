//! OPeNDAP DAP2 binary response decoding.
//!
//! A `.dods` response is the dataset descriptor (DDS) as text, a `Data:` marker
//! line, and the values in XDR encoding. Arrays carry their element count twice
//! before the values; 16-bit integers travel as 32-bit words and byte arrays
//! are padded to a multiple of four.
//!
//! Only the first variable in the payload is read, which is the projected
//! variable itself for both plain arrays and Grid constraints (the ARRAY member
//! precedes the MAPS).

use bytes::Buf;
use lazy_static::lazy_static;
use ndarray::Array2;
use regex::Regex;

lazy_static! {
    static ref DECL_RE: Regex = Regex::new(
        r"\b(Byte|Int16|UInt16|Int32|UInt32|Float32|Float64)\s+([A-Za-z_][\w.%]*)\s*((?:\[[^\]]*\]\s*)+);"
    )
    .unwrap();
    static ref DIM_RE: Regex = Regex::new(r"\[\s*(?:[^=\]]*=\s*)?(\d+)\s*\]").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DapType {
    Byte,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Float32,
    Float64,
}

impl DapType {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Byte" => Some(DapType::Byte),
            "Int16" => Some(DapType::Int16),
            "UInt16" => Some(DapType::UInt16),
            "Int32" => Some(DapType::Int32),
            "UInt32" => Some(DapType::UInt32),
            "Float32" => Some(DapType::Float32),
            "Float64" => Some(DapType::Float64),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DapType::Byte => "Byte",
            DapType::Int16 => "Int16",
            DapType::UInt16 => "UInt16",
            DapType::Int32 => "Int32",
            DapType::UInt32 => "UInt32",
            DapType::Float32 => "Float32",
            DapType::Float64 => "Float64",
        }
    }

    /// Bytes per element on the wire (bytes excluded, they are packed).
    fn wire_width(&self) -> usize {
        match self {
            DapType::Float64 => 8,
            _ => 4,
        }
    }
}

/// One array declaration from a DDS.
#[derive(Debug, Clone, PartialEq)]
pub struct DdsArray {
    pub name: String,
    pub dap_type: DapType,
    pub shape: Vec<usize>,
}

impl DdsArray {
    /// `None` when the declared shape does not fit in `usize`.
    pub fn element_count(&self) -> Option<usize> {
        self.shape.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
    }
}

/// Finds the array declaration of `variable` in a DDS.
///
/// Qualified names (`XCO2.XCO2`) match on their last component.
pub fn parse_dds(dds: &str, variable: &str) -> Result<DdsArray, String> {
    for cap in DECL_RE.captures_iter(dds) {
        let name = &cap[2];
        let short = name.rsplit('.').next().unwrap_or(name);
        if short != variable {
            continue;
        }

        // regex only admits the type names DapType knows
        let dap_type = DapType::from_name(&cap[1]).ok_or_else(|| format!("unsupported type {}", &cap[1]))?;
        let shape = DIM_RE
            .captures_iter(&cap[3])
            .map(|d| d[1].parse::<usize>().map_err(|e| format!("bad dimension '{}': {}", &d[1], e)))
            .collect::<Result<Vec<usize>, String>>()?;

        return Ok(DdsArray {
            name: short.to_string(),
            dap_type,
            shape,
        });
    }
    Err(format!("variable '{}' not declared as an array in DDS", variable))
}

/// Splits a `.dods` body into DDS text and XDR payload.
pub fn split_dods(body: &[u8]) -> Result<(&str, &[u8]), String> {
    const MARKERS: [&[u8]; 2] = [b"\nData:\n", b"\nData:\r\n"];

    let (pos, len) = MARKERS
        .iter()
        .filter_map(|m| body.windows(m.len()).position(|w| w == *m).map(|p| (p, m.len())))
        .min_by_key(|(p, _)| *p)
        .ok_or_else(|| {
            // DAP errors come back as text, surface the start of it
            let head = String::from_utf8_lossy(&body[..body.len().min(200)]).into_owned();
            format!("no Data marker in response: {}", head.trim())
        })?;

    let dds = std::str::from_utf8(&body[..pos]).map_err(|e| format!("DDS is not UTF-8: {}", e))?;
    Ok((dds, &body[pos + len..]))
}

/// Reads the leading `take` values of an XDR array described by `array`.
///
/// The whole array must be present in the payload even if fewer values are
/// taken.
pub fn decode_xdr_array(mut xdr: &[u8], array: &DdsArray, take: usize) -> Result<Vec<f64>, String> {
    let count = array
        .element_count()
        .ok_or_else(|| format!("declared shape {:?} overflows", array.shape))?;
    if xdr.remaining() < 8 {
        return Err("payload too short for array length".to_string());
    }
    let first = xdr.get_u32() as usize;
    let second = xdr.get_u32() as usize;
    if first != count || second != count {
        return Err(format!(
            "array length words {}/{} do not match declared shape {:?} ({} values)",
            first, second, array.shape, count
        ));
    }

    let needed = match array.dap_type {
        DapType::Byte => count.div_ceil(4).checked_mul(4),
        t => count.checked_mul(t.wire_width()),
    }
    .ok_or_else(|| format!("declared shape {:?} overflows", array.shape))?;
    if xdr.remaining() < needed {
        return Err(format!(
            "payload truncated: {} bytes for {} {} values, need {}",
            xdr.remaining(),
            count,
            array.dap_type.name(),
            needed
        ));
    }

    let take = take.min(count);
    let mut values = Vec::with_capacity(take);
    for _ in 0..take {
        let v = match array.dap_type {
            DapType::Byte => xdr.get_u8() as f64,
            DapType::Int16 | DapType::Int32 => xdr.get_i32() as f64,
            DapType::UInt16 | DapType::UInt32 => xdr.get_u32() as f64,
            DapType::Float32 => xdr.get_f32() as f64,
            DapType::Float64 => xdr.get_f64(),
        };
        values.push(v);
    }
    Ok(values)
}

/// Decodes `variable` from a `.dods` body into a 2-D grid.
///
/// Variables of rank > 2 yield the first slice of their leading dimensions,
/// e.g. the first time step of `XCO2[time][lat][lon]`.
pub fn decode_dods(body: &[u8], variable: &str) -> Result<(DdsArray, Array2<f64>), String> {
    let (dds, xdr) = split_dods(body)?;
    let array = parse_dds(dds, variable)?;

    let rank = array.shape.len();
    if rank < 2 {
        return Err(format!(
            "variable '{}' has rank {} ({:?}), need at least 2",
            variable, rank, array.shape
        ));
    }
    let rows = array.shape[rank - 2];
    let cols = array.shape[rank - 1];

    let slice = rows
        .checked_mul(cols)
        .ok_or_else(|| format!("declared shape {:?} overflows", array.shape))?;
    let values = decode_xdr_array(xdr, &array, slice)?;
    let grid = Array2::from_shape_vec((rows, cols), values).map_err(|e| e.to_string())?;
    Ok((array, grid))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const GRID_DDS: &str = "Dataset {
    Grid {
      ARRAY:
        Float32 XCO2[time = 1][lat = 2][lon = 3];
      MAPS:
        Float64 time[time = 1];
        Float64 lat[lat = 2];
        Float64 lon[lon = 3];
    } XCO2;
} OCO2_GEOS_L3CO2_DAY.10r/2021/oco2_GEOS_L3CO2_day_20211001_B10206Ar.nc4;";

    fn length_words(n: u32) -> Vec<u8> {
        let mut v = n.to_be_bytes().to_vec();
        v.extend_from_slice(&n.to_be_bytes());
        v
    }

    fn dods(dds: &str, payload: &[u8]) -> Vec<u8> {
        let mut body = dds.as_bytes().to_vec();
        body.extend_from_slice(b"\nData:\n");
        body.extend_from_slice(payload);
        body
    }

    fn float32_payload(values: &[f32]) -> Vec<u8> {
        let mut p = length_words(values.len() as u32);
        for v in values {
            p.extend_from_slice(&v.to_be_bytes());
        }
        p
    }

    #[test]
    fn test_parse_dds_finds_grid_array_member() {
        let a = parse_dds(GRID_DDS, "XCO2").unwrap();
        assert_eq!(a.dap_type, DapType::Float32);
        assert_eq!(a.shape, vec![1, 2, 3]);
        assert_eq!(a.element_count(), Some(6));
    }

    #[test]
    fn test_parse_dds_matches_qualified_name_and_anonymous_dims() {
        let dds = "Dataset {\n    Int16 grp.SST[180][360];\n} x;";
        let a = parse_dds(dds, "SST").unwrap();
        assert_eq!(a.dap_type, DapType::Int16);
        assert_eq!(a.shape, vec![180, 360]);
    }

    #[test]
    fn test_parse_dds_missing_variable_is_error() {
        let err = parse_dds(GRID_DDS, "CO").unwrap_err();
        assert!(err.contains("'CO'"), "got {}", err);
    }

    #[test]
    fn test_decode_float32_grid_keeps_first_time_step() {
        let values = [400.0f32, 401.0, 402.0, 403.0, 404.0, 405.0];
        let mut payload = float32_payload(&values);
        // map arrays follow the ARRAY member and must be ignored
        payload.extend_from_slice(&length_words(1));
        payload.extend_from_slice(&0f64.to_be_bytes());

        let (array, grid) = decode_dods(&dods(GRID_DDS, &payload), "XCO2").unwrap();
        assert_eq!(array.shape, vec![1, 2, 3]);
        assert_eq!(grid.dim(), (2, 3));
        assert_eq!(grid[[0, 0]], 400.0);
        assert_eq!(grid[[1, 2]], 405.0);
    }

    #[test]
    fn test_decode_takes_first_slice_of_multi_step_variable() {
        let dds = "Dataset {\n    Float32 XCO2[time = 2][lat = 1][lon = 2];\n} d;";
        let payload = float32_payload(&[1.0, 2.0, 9.0, 9.0]);
        let (_, grid) = decode_dods(&dods(dds, &payload), "XCO2").unwrap();
        assert_eq!(grid.iter().copied().collect::<Vec<_>>(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_decode_int16_values_are_sent_as_32_bit_words() {
        let dds = "Dataset {\n    Int16 q[y = 1][x = 2];\n} d;";
        let mut payload = length_words(2);
        payload.extend_from_slice(&(-5i32).to_be_bytes());
        payload.extend_from_slice(&7i32.to_be_bytes());
        let (_, grid) = decode_dods(&dods(dds, &payload), "q").unwrap();
        assert_eq!(grid[[0, 0]], -5.0);
        assert_eq!(grid[[0, 1]], 7.0);
    }

    #[test]
    fn test_decode_byte_array_with_padding() {
        let dds = "Dataset {\n    Byte mask[y = 1][x = 3];\n} d;";
        let mut payload = length_words(3);
        payload.extend_from_slice(&[1, 2, 255, 0]);
        let (_, grid) = decode_dods(&dods(dds, &payload), "mask").unwrap();
        assert_eq!(grid.iter().copied().collect::<Vec<_>>(), vec![1.0, 2.0, 255.0]);
    }

    #[test]
    fn test_truncated_payload_is_rejected() {
        let mut payload = float32_payload(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        payload.truncate(payload.len() - 4);
        let err = decode_dods(&dods(GRID_DDS, &payload), "XCO2").unwrap_err();
        assert!(err.contains("truncated"), "got {}", err);
    }

    #[test]
    fn test_length_mismatch_is_rejected() {
        let payload = float32_payload(&[1.0, 2.0]);
        let err = decode_dods(&dods(GRID_DDS, &payload), "XCO2").unwrap_err();
        assert!(err.contains("do not match"), "got {}", err);
    }

    #[test]
    fn test_dap_error_document_is_reported() {
        let body = b"Error {\n    code = 404;\n    message = \"No such file\";\n};";
        let err = decode_dods(body, "XCO2").unwrap_err();
        assert!(err.contains("no Data marker") && err.contains("No such file"), "got {}", err);
    }

    #[test]
    fn test_rank_one_variable_is_rejected() {
        let dds = "Dataset {\n    Float32 xco2[sounding = 2];\n} d;";
        let payload = float32_payload(&[1.0, 2.0]);
        let err = decode_dods(&dods(dds, &payload), "xco2").unwrap_err();
        assert!(err.contains("rank 1"), "got {}", err);
    }

    #[test]
    fn test_oversized_declared_shape_is_decode_error_not_panic() {
        let dds = "Dataset {\n    Float32 XCO2[time = 4294967296][lat = 4294967296][lon = 4294967296];\n} x;";
        let err = decode_dods(&dods(dds, &length_words(0)), "XCO2").unwrap_err();
        assert!(err.contains("overflows"), "got {}", err);

        let huge = DdsArray {
            name: "XCO2".to_string(),
            dap_type: DapType::Float64,
            shape: vec![usize::MAX / 2, 3],
        };
        assert_eq!(huge.element_count(), None);
        let err = decode_xdr_array(&length_words(0), &huge, 1).unwrap_err();
        assert!(err.contains("overflows"), "got {}", err);
    }
}

//! Point-cloud buffer decoding.
//!
//! LIDAR records carry their points as one raw byte buffer plus a list of
//! [`FieldDescriptor`]s that say where each channel lives inside a point.
//! Only the canonical layout is accepted:
//!
//! ```text
//! byte  0      4      8      12     16
//!       | x    | y    | z    | int. |      (z may be absent, slot ignored)
//! ```
//!
//! Each channel is a little-endian `f32`, points are packed with no padding
//! (`point_step == 16`, `row_step == width * 16`). Once that is verified the
//! whole buffer is reinterpreted in a single bulk cast instead of walking
//! points and fields one at a time.

use crate::types::{DecodedPointCloud, FieldDescriptor, PointCloud, PointFieldType};
use thiserror::Error;

/// Bytes per point in the canonical layout.
pub const CANONICAL_POINT_STEP: u32 = 16;

const OFFSET_X: u32 = 0;
const OFFSET_Y: u32 = 4;
const OFFSET_Z: u32 = 8;
const OFFSET_INTENSITY: u32 = 12;

/// Errors raised when a point cloud does not use the canonical layout.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    #[error("expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },

    #[error("missing `{0}` field")]
    MissingField(&'static str),

    #[error("duplicate `{0}` field")]
    DuplicateField(String),

    #[error("field `{name}` at offset {found}, expected {expected}")]
    Offset {
        name: String,
        expected: u32,
        found: u32,
    },

    #[error("field `{name}` must be a single float32, found {datatype:?} x{count}")]
    FieldType {
        name: String,
        datatype: PointFieldType,
        count: u32,
    },

    #[error("field `{name}` must lie within bytes 8..12, found offset {offset} and {size} bytes")]
    Filler { name: String, offset: u32, size: u32 },

    #[error("{width}x{height} points do not fit in one accumulator")]
    PointCount { width: u32, height: u32 },

    #[error("point_step is {0}, expected 16")]
    PointStep(u32),

    #[error("row_step {row_step} does not equal width {width} * point_step {point_step}")]
    RowStep {
        row_step: u32,
        width: u32,
        point_step: u32,
    },

    #[error("data length {found} does not equal row_step * height = {expected}")]
    DataLength { expected: u64, found: u64 },

    #[error("big-endian point data is not supported")]
    BigEndian,
}

/// Which of the two accepted layouts a cloud uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanonicalLayout {
    /// x, y, z, intensity at 0, 4, 8, 12
    Xyzi,
    /// x, y, intensity at 0, 4, 12; bytes 8..12 carry no channel
    ZOmitted,
}

impl CanonicalLayout {
    #[inline]
    pub fn has_z(self) -> bool {
        self == Self::Xyzi
    }
}

/// Points as an `(n, 4)` matrix of `[x, y, z, intensity]` rows.
///
/// For [`CanonicalLayout::ZOmitted`] clouds the z column is zero.
#[derive(Debug, Clone, PartialEq)]
pub struct PointMatrix {
    pub layout: CanonicalLayout,
    pub rows: Vec<[f32; 4]>,
}

impl PointMatrix {
    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Default)]
struct ResolvedFields<'a> {
    x: Option<&'a FieldDescriptor>,
    y: Option<&'a FieldDescriptor>,
    z: Option<&'a FieldDescriptor>,
    intensity: Option<&'a FieldDescriptor>,
}

fn resolve_fields(fields: &[FieldDescriptor]) -> Result<ResolvedFields<'_>, LayoutError> {
    let mut resolved = ResolvedFields::default();
    for field in fields {
        let slot = match field.name.as_str() {
            "x" => &mut resolved.x,
            "y" => &mut resolved.y,
            "z" => &mut resolved.z,
            "intensity" => &mut resolved.intensity,
            _ => continue,
        };
        if slot.is_some() {
            return Err(LayoutError::DuplicateField(field.name.clone()));
        }
        *slot = Some(field);
    }
    Ok(resolved)
}

fn check_field(
    field: Option<&FieldDescriptor>,
    name: &'static str,
    offset: u32,
) -> Result<(), LayoutError> {
    let field = field.ok_or(LayoutError::MissingField(name))?;
    if field.offset != offset {
        return Err(LayoutError::Offset {
            name: field.name.clone(),
            expected: offset,
            found: field.offset,
        });
    }
    if field.datatype != PointFieldType::Float32 || field.count != 1 {
        return Err(LayoutError::FieldType {
            name: field.name.clone(),
            datatype: field.datatype,
            count: field.count,
        });
    }
    Ok(())
}

/// Checks the channel occupying the z slot of a z-omitted cloud, if any.
fn check_filler(fields: &[FieldDescriptor]) -> Result<(), LayoutError> {
    let filler = fields
        .iter()
        .find(|f| !matches!(f.name.as_str(), "x" | "y" | "intensity"));
    let Some(field) = filler else {
        return Ok(());
    };
    let size = field.datatype.size_bytes().saturating_mul(field.count);
    if field.offset != OFFSET_Z || size > OFFSET_INTENSITY - OFFSET_Z {
        return Err(LayoutError::Filler {
            name: field.name.clone(),
            offset: field.offset,
            size,
        });
    }
    Ok(())
}

/// Validates point-cloud layouts and reinterprets their buffers.
#[derive(Debug, Clone, Copy, Default)]
pub struct PointCloudFieldDecoder;

impl PointCloudFieldDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Checks that `cloud` uses one of the canonical layouts and that its
    /// buffer is exactly as long as the geometry says.
    pub fn validate(&self, cloud: &PointCloud) -> Result<CanonicalLayout, LayoutError> {
        let fields = resolve_fields(&cloud.fields)?;
        let layout = if fields.z.is_some() {
            CanonicalLayout::Xyzi
        } else {
            CanonicalLayout::ZOmitted
        };

        // Without z, the 8..12 slot is either undeclared or holds one other
        // channel that is ignored.
        let count_ok = match layout {
            CanonicalLayout::Xyzi => cloud.fields.len() == 4,
            CanonicalLayout::ZOmitted => matches!(cloud.fields.len(), 3 | 4),
        };
        if !count_ok {
            return Err(LayoutError::FieldCount {
                expected: 4,
                found: cloud.fields.len(),
            });
        }

        check_field(fields.x, "x", OFFSET_X)?;
        check_field(fields.y, "y", OFFSET_Y)?;
        if layout.has_z() {
            check_field(fields.z, "z", OFFSET_Z)?;
        }
        check_field(fields.intensity, "intensity", OFFSET_INTENSITY)?;
        if !layout.has_z() {
            check_filler(&cloud.fields)?;
        }

        if cloud.point_step != CANONICAL_POINT_STEP {
            return Err(LayoutError::PointStep(cloud.point_step));
        }
        if cloud.row_step as u64 != cloud.width as u64 * cloud.point_step as u64 {
            return Err(LayoutError::RowStep {
                row_step: cloud.row_step,
                width: cloud.width,
                point_step: cloud.point_step,
            });
        }
        if cloud.is_bigendian {
            return Err(LayoutError::BigEndian);
        }

        let expected_len = cloud.row_step as u64 * cloud.height as u64;
        if cloud.data.len() as u64 != expected_len {
            return Err(LayoutError::DataLength {
                expected: expected_len,
                found: cloud.data.len() as u64,
            });
        }

        Ok(layout)
    }

    /// Reinterprets the buffer as `width * height` rows of four floats.
    pub fn decode_points(&self, cloud: &PointCloud) -> Result<PointMatrix, LayoutError> {
        let layout = self.validate(cloud)?;

        // `data` is not f32-aligned; copy rather than cast in place.
        let mut rows: Vec<[f32; 4]> = bytemuck::pod_collect_to_vec(&cloud.data);
        debug_assert_eq!(Some(rows.len()), cloud.point_count());

        if cfg!(target_endian = "big") {
            for row in &mut rows {
                for value in row.iter_mut() {
                    *value = f32::from_bits(value.to_bits().swap_bytes());
                }
            }
        }
        if !layout.has_z() {
            for row in &mut rows {
                row[2] = 0.0;
            }
        }

        Ok(PointMatrix { layout, rows })
    }

    /// Decodes the cloud into separate owned columns.
    pub fn decode(&self, cloud: &PointCloud) -> Result<DecodedPointCloud, LayoutError> {
        let matrix = self.decode_points(cloud)?;
        let n = matrix.len();
        let mut decoded = DecodedPointCloud {
            x: Vec::with_capacity(n),
            y: Vec::with_capacity(n),
            z: matrix.layout.has_z().then(|| Vec::with_capacity(n)),
            intensity: Vec::with_capacity(n),
        };
        for row in &matrix.rows {
            decoded.x.push(row[0]);
            decoded.y.push(row[1]);
            if let Some(z) = decoded.z.as_mut() {
                z.push(row[2]);
            }
            decoded.intensity.push(row[3]);
        }
        Ok(decoded)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::PointCloudHeader;

    pub(crate) fn canonical_fields() -> Vec<FieldDescriptor> {
        vec![
            FieldDescriptor::float32("x", 0),
            FieldDescriptor::float32("y", 4),
            FieldDescriptor::float32("z", 8),
            FieldDescriptor::float32("intensity", 12),
        ]
    }

    pub(crate) fn cloud_from_points(width: u32, height: u32, points: &[[f32; 4]]) -> PointCloud {
        let data: Vec<u8> = points
            .iter()
            .flat_map(|p| p.iter().flat_map(|v| v.to_le_bytes()))
            .collect();
        PointCloud {
            header: PointCloudHeader::default(),
            width,
            height,
            point_step: 16,
            row_step: width * 16,
            fields: canonical_fields(),
            data,
            is_bigendian: false,
            is_dense: true,
        }
    }

    fn planted(n: usize) -> Vec<[f32; 4]> {
        (0..n)
            .map(|i| {
                let i = i as f32;
                [i + 0.5, -i * 2.0, i * 0.25, 100.0 + i]
            })
            .collect()
    }

    #[test]
    fn test_decode_4x2_planted_values() {
        let points = planted(8);
        let cloud = cloud_from_points(4, 2, &points);
        let decoded = PointCloudFieldDecoder::new().decode(&cloud).unwrap();

        assert_eq!(decoded.len(), 8);
        let z = decoded.z.as_ref().unwrap();
        for (i, p) in points.iter().enumerate() {
            assert_eq!(decoded.x[i], p[0]);
            assert_eq!(decoded.y[i], p[1]);
            assert_eq!(z[i], p[2]);
            assert_eq!(decoded.intensity[i], p[3]);
        }
    }

    #[test]
    fn test_decode_points_matrix() {
        let points = planted(3);
        let cloud = cloud_from_points(3, 1, &points);
        let matrix = PointCloudFieldDecoder::new().decode_points(&cloud).unwrap();
        assert_eq!(matrix.layout, CanonicalLayout::Xyzi);
        assert_eq!(matrix.rows, points);
    }

    #[test]
    fn test_field_order_in_list_does_not_matter() {
        let mut cloud = cloud_from_points(2, 1, &planted(2));
        cloud.fields.reverse();
        assert!(PointCloudFieldDecoder::new().decode(&cloud).is_ok());
    }

    #[test]
    fn test_y_at_offset_8_rejected() {
        let mut cloud = cloud_from_points(4, 2, &planted(8));
        cloud.fields[1].offset = 8;
        assert_eq!(
            PointCloudFieldDecoder::new().decode(&cloud),
            Err(LayoutError::Offset {
                name: "y".into(),
                expected: 4,
                found: 8
            })
        );
    }

    #[test]
    fn test_z_omitted_layout() {
        let mut cloud = cloud_from_points(2, 1, &[[1.0, 2.0, 9.0, 3.0], [4.0, 5.0, 9.0, 6.0]]);
        cloud.fields.remove(2);
        let decoder = PointCloudFieldDecoder::new();

        let decoded = decoder.decode(&cloud).unwrap();
        assert!(decoded.z.is_none());
        assert_eq!(decoded.x, vec![1.0, 4.0]);
        assert_eq!(decoded.intensity, vec![3.0, 6.0]);

        let matrix = decoder.decode_points(&cloud).unwrap();
        assert_eq!(matrix.layout, CanonicalLayout::ZOmitted);
        assert_eq!(matrix.rows[0], [1.0, 2.0, 0.0, 3.0]);
    }

    #[test]
    fn test_z_omitted_with_channel_in_z_slot() {
        let mut cloud = cloud_from_points(2, 1, &[[1.0, 2.0, 9.0, 3.0], [4.0, 5.0, 9.0, 6.0]]);
        cloud.fields[2] = FieldDescriptor {
            name: "ring".into(),
            offset: 8,
            datatype: PointFieldType::Uint16,
            count: 1,
        };
        let decoder = PointCloudFieldDecoder::new();

        assert_eq!(decoder.validate(&cloud), Ok(CanonicalLayout::ZOmitted));
        let matrix = decoder.decode_points(&cloud).unwrap();
        assert_eq!(matrix.rows[1], [4.0, 5.0, 0.0, 6.0]);
    }

    #[test]
    fn test_z_omitted_channel_outside_z_slot_rejected() {
        let mut cloud = cloud_from_points(1, 1, &planted(1));
        cloud.fields[2] = FieldDescriptor::float32("ring", 16);
        assert_eq!(
            PointCloudFieldDecoder::new().validate(&cloud),
            Err(LayoutError::Filler {
                name: "ring".into(),
                offset: 16,
                size: 4
            })
        );

        cloud.fields[2] = FieldDescriptor {
            name: "t".into(),
            offset: 8,
            datatype: PointFieldType::Float64,
            count: 1,
        };
        assert!(matches!(
            PointCloudFieldDecoder::new().validate(&cloud),
            Err(LayoutError::Filler { size: 8, .. })
        ));
    }

    #[test]
    fn test_z_omitted_with_two_extra_fields_rejected() {
        let mut cloud = cloud_from_points(1, 1, &planted(1));
        cloud.fields[2] = FieldDescriptor::float32("ring", 8);
        cloud.fields.push(FieldDescriptor::float32("t", 8));
        assert_eq!(
            PointCloudFieldDecoder::new().validate(&cloud),
            Err(LayoutError::FieldCount {
                expected: 4,
                found: 5
            })
        );
    }

    #[test]
    fn test_extra_field_rejected() {
        let mut cloud = cloud_from_points(1, 1, &planted(1));
        cloud.fields.push(FieldDescriptor::float32("ring", 16));
        assert_eq!(
            PointCloudFieldDecoder::new().validate(&cloud),
            Err(LayoutError::FieldCount {
                expected: 4,
                found: 5
            })
        );
    }

    #[test]
    fn test_missing_intensity_rejected() {
        let mut cloud = cloud_from_points(1, 1, &planted(1));
        cloud.fields[3].name = "reflectivity".into();
        assert_eq!(
            PointCloudFieldDecoder::new().validate(&cloud),
            Err(LayoutError::MissingField("intensity"))
        );
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let mut cloud = cloud_from_points(1, 1, &planted(1));
        cloud.fields[2].name = "x".into();
        assert_eq!(
            PointCloudFieldDecoder::new().validate(&cloud),
            Err(LayoutError::DuplicateField("x".into()))
        );
    }

    #[test]
    fn test_non_float_field_rejected() {
        let mut cloud = cloud_from_points(1, 1, &planted(1));
        cloud.fields[3].datatype = PointFieldType::Uint32;
        assert!(matches!(
            PointCloudFieldDecoder::new().validate(&cloud),
            Err(LayoutError::FieldType { .. })
        ));
    }

    #[test]
    fn test_data_length_mismatch_rejected() {
        let mut cloud = cloud_from_points(2, 2, &planted(4));
        cloud.data.pop();
        assert_eq!(
            PointCloudFieldDecoder::new().validate(&cloud),
            Err(LayoutError::DataLength {
                expected: 64,
                found: 63
            })
        );
    }

    #[test]
    fn test_padded_rows_rejected() {
        let mut cloud = cloud_from_points(2, 1, &planted(2));
        cloud.row_step = 40;
        cloud.data.extend_from_slice(&[0; 8]);
        assert!(matches!(
            PointCloudFieldDecoder::new().validate(&cloud),
            Err(LayoutError::RowStep { .. })
        ));
    }

    #[test]
    fn test_big_endian_rejected() {
        let mut cloud = cloud_from_points(1, 1, &planted(1));
        cloud.is_bigendian = true;
        assert_eq!(
            PointCloudFieldDecoder::new().validate(&cloud),
            Err(LayoutError::BigEndian)
        );
    }

    #[test]
    fn test_zero_points_is_empty() {
        let cloud = cloud_from_points(0, 1, &[]);
        let decoded = PointCloudFieldDecoder::new().decode(&cloud).unwrap();
        assert!(decoded.is_empty());
        assert_eq!(decoded.z, Some(Vec::new()));
    }
}

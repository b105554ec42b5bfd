//! STL decoding and encoding for binary and ASCII formats
use nalgebra::{Point3, Vector3};
use nom::{
    branch::alt,
    bytes::complete::tag_no_case,
    character::complete::{space0, space1},
    combinator::{all_consuming, eof, map, peek, rest, value},
    number::complete::{double, le_f32, le_u16, le_u32},
    sequence::{pair, preceded, terminated, tuple},
    IResult,
};
use tracing::debug;

use crate::config::DecodeParams;
use crate::error::{DecodeError, FormatError};
use crate::geometry::{Mesh, MeshBuilder, MAX_TRIANGLES};
use crate::pipeline::Deadline;

/// Binary STL header size in bytes.
pub const HEADER_SIZE: usize = 80;

/// Size of the triangle count that follows the header.
const COUNT_SIZE: usize = 4;

/// Size of one binary triangle record (normal, 3 vertices, attribute).
pub const TRIANGLE_SIZE: usize = 50;

/// How many records or lines are decoded between deadline checks.
const POLL_INTERVAL: usize = 1024;

/// The two STL encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StlFormat {
    Ascii,
    Binary,
}

/// Decide the encoding from the leading bytes.
///
/// Text files start (after optional whitespace) with the keyword `solid`
/// followed by whitespace, in any case. Everything else is binary.
pub fn detect_format(data: &[u8]) -> StlFormat {
    let start = data
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(data.len());
    let head = &data[start..];

    let is_text = head.len() >= 5
        && head[..5].eq_ignore_ascii_case(b"solid")
        && head.get(5).map_or(true, u8::is_ascii_whitespace);

    if is_text {
        StlFormat::Ascii
    } else {
        StlFormat::Binary
    }
}

/// Decodes STL bytes into a [`Mesh`].
///
/// Decoding is a single pass over the input. Vertices are not deduplicated
/// and degenerate triangles are kept.
#[derive(Debug, Clone, Copy)]
pub struct MeshDecoder {
    max_triangles: u64,
    deadline: Deadline,
}

impl Default for MeshDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl MeshDecoder {
    pub fn new() -> Self {
        Self::with_params(&DecodeParams::default())
    }

    pub fn with_params(params: &DecodeParams) -> Self {
        Self {
            max_triangles: params.max_triangles.min(MAX_TRIANGLES),
            deadline: Deadline::none(),
        }
    }

    /// Abort with [`DecodeError::TimedOut`] once `deadline` passes.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    /// Detect the encoding and decode.
    ///
    /// Some exporters write binary files whose header starts with `solid `.
    /// When text decoding fails and the buffer length is exactly what the
    /// binary layout implies, the buffer is decoded as binary instead.
    pub fn decode(&self, data: &[u8]) -> Result<Mesh, DecodeError> {
        match detect_format(data) {
            StlFormat::Binary => self.decode_binary(data),
            StlFormat::Ascii => match self.decode_ascii(data) {
                Err(DecodeError::Format(err)) if binary_size_matches(data) => {
                    debug!(%err, "text decoding failed but size matches binary layout");
                    self.decode_binary(data)
                }
                result => result,
            },
        }
    }

    /// Decode the binary encoding.
    pub fn decode_binary(&self, data: &[u8]) -> Result<Mesh, DecodeError> {
        let actual = data.len() as u64;
        let count = declared_triangle_count(data).ok_or(FormatError::TruncatedFile {
            expected: (HEADER_SIZE + COUNT_SIZE) as u64,
            actual,
        })?;

        // Validate before allocating anything sized by the untrusted count.
        let expected = binary_size(count);
        if actual < expected {
            return Err(FormatError::TruncatedFile { expected, actual }.into());
        }
        if count > self.max_triangles {
            return Err(FormatError::TooManyTriangles {
                count,
                limit: self.max_triangles,
            }
            .into());
        }
        if actual > expected {
            debug!(trailing = actual - expected, "ignoring bytes after last STL record");
        }

        let count = count as usize;
        let mut builder = MeshBuilder::with_capacity(count).with_limit(self.max_triangles);
        let mut input = &data[HEADER_SIZE + COUNT_SIZE..];

        for triangle in 0..count {
            if triangle % POLL_INTERVAL == 0 && self.deadline.expired() {
                return Err(DecodeError::TimedOut);
            }

            let (remaining, (normal, corners)) =
                facet_record(input).map_err(|_| FormatError::TruncatedFile { expected, actual })?;
            input = remaining;

            if corners.iter().flatten().any(|c| !c.is_finite()) {
                return Err(FormatError::NonFiniteCoordinate { triangle }.into());
            }

            let corners = corners.map(|[x, y, z]| {
                Point3::new(f64::from(x), f64::from(y), f64::from(z))
            });
            let normal = Vector3::new(
                f64::from(normal[0]),
                f64::from(normal[1]),
                f64::from(normal[2]),
            );
            builder.push_facet(corners, Some(normal))?;
        }

        debug!(triangles = count, "decoded binary STL");
        Ok(builder.build())
    }

    /// Decode the ASCII encoding.
    pub fn decode_ascii(&self, data: &[u8]) -> Result<Mesh, DecodeError> {
        let mut builder = MeshBuilder::new().with_limit(self.max_triangles);
        let mut state = AsciiState::ExpectSolid;
        let mut normal = None;
        let mut corners: Vec<Point3<f64>> = Vec::with_capacity(3);
        let mut solids = 0usize;
        let mut last_line = 0;

        for (index, raw) in data.split(|&b| b == b'\n').enumerate() {
            let line_no = index + 1;
            last_line = line_no;

            if index % POLL_INTERVAL == 0 && self.deadline.expired() {
                return Err(DecodeError::TimedOut);
            }

            let line = std::str::from_utf8(raw)
                .map_err(|_| FormatError::malformed(line_no, "invalid UTF-8"))?
                .trim();
            if line.is_empty() {
                continue;
            }

            let stmt = match all_consuming(statement)(line) {
                Ok((_, stmt)) => stmt,
                Err(_) => {
                    return Err(FormatError::malformed(
                        line_no,
                        format!("malformed statement '{}'", excerpt(line)),
                    )
                    .into())
                }
            };

            state = match (state, stmt) {
                (AsciiState::ExpectSolid, Statement::Solid) => {
                    solids += 1;
                    AsciiState::InSolid
                }
                (AsciiState::InSolid, Statement::Facet(n)) => {
                    if builder.triangle_count() as u64 >= self.max_triangles {
                        return Err(FormatError::TooManyTriangles {
                            count: builder.triangle_count() as u64 + 1,
                            limit: self.max_triangles,
                        }
                        .into());
                    }
                    normal = Some(Vector3::from(n));
                    AsciiState::InFacet
                }
                (AsciiState::InSolid, Statement::EndSolid) => AsciiState::ExpectSolid,
                (AsciiState::InFacet, Statement::OuterLoop) => {
                    corners.clear();
                    AsciiState::InLoop
                }
                (AsciiState::InLoop, Statement::Vertex(v)) => {
                    if corners.len() == 3 {
                        return Err(FormatError::malformed(
                            line_no,
                            "more than three vertices in facet",
                        )
                        .into());
                    }
                    if v.iter().any(|c| !c.is_finite()) {
                        return Err(
                            FormatError::malformed(line_no, "non-finite vertex coordinate").into()
                        );
                    }
                    corners.push(Point3::from(v));
                    AsciiState::InLoop
                }
                (AsciiState::InLoop, Statement::EndLoop) => {
                    if corners.len() != 3 {
                        return Err(FormatError::malformed(
                            line_no,
                            format!("facet has {} vertices, expected 3", corners.len()),
                        )
                        .into());
                    }
                    AsciiState::AfterLoop
                }
                (AsciiState::AfterLoop, Statement::EndFacet) => {
                    builder.push_facet([corners[0], corners[1], corners[2]], normal.take())?;
                    AsciiState::InSolid
                }
                (state, _) => {
                    return Err(FormatError::malformed(
                        line_no,
                        format!("expected {}, found '{}'", state.expected(), excerpt(line)),
                    )
                    .into())
                }
            };
        }

        if state != AsciiState::ExpectSolid || solids == 0 {
            return Err(FormatError::malformed(
                last_line + 1,
                format!("unexpected end of input, expected {}", state.expected()),
            )
            .into());
        }

        debug!(triangles = builder.triangle_count(), solids, "decoded ASCII STL");
        Ok(builder.build())
    }
}

/// Decode an STL buffer of either encoding with default limits.
pub fn parse_stl(data: &[u8]) -> Result<Mesh, DecodeError> {
    MeshDecoder::new().decode(data)
}

/// Decode a binary STL buffer with default limits.
pub fn parse_binary_stl(data: &[u8]) -> Result<Mesh, DecodeError> {
    MeshDecoder::new().decode_binary(data)
}

/// Decode an ASCII STL buffer with default limits.
pub fn parse_ascii_stl(input: &str) -> Result<Mesh, DecodeError> {
    MeshDecoder::new().decode_ascii(input.as_bytes())
}

fn declared_triangle_count(data: &[u8]) -> Option<u64> {
    let bytes = data.get(HEADER_SIZE..HEADER_SIZE + COUNT_SIZE)?;
    le_u32::<_, nom::error::Error<&[u8]>>(bytes)
        .ok()
        .map(|(_, count)| u64::from(count))
}

fn binary_size(count: u64) -> u64 {
    (HEADER_SIZE + COUNT_SIZE) as u64 + count * TRIANGLE_SIZE as u64
}

fn binary_size_matches(data: &[u8]) -> bool {
    declared_triangle_count(data).is_some_and(|count| binary_size(count) == data.len() as u64)
}

type Facet = ([f32; 3], [[f32; 3]; 3]);

fn facet_record(input: &[u8]) -> IResult<&[u8], Facet> {
    let (input, normal) = le_vec3(input)?;
    let (input, v0) = le_vec3(input)?;
    let (input, v1) = le_vec3(input)?;
    let (input, v2) = le_vec3(input)?;
    // Attribute byte count, unused
    let (input, _) = le_u16(input)?;
    Ok((input, (normal, [v0, v1, v2])))
}

fn le_vec3(input: &[u8]) -> IResult<&[u8], [f32; 3]> {
    let (input, (x, y, z)) = tuple((le_f32, le_f32, le_f32))(input)?;
    Ok((input, [x, y, z]))
}

/// Position in the ASCII facet grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AsciiState {
    ExpectSolid,
    InSolid,
    InFacet,
    InLoop,
    AfterLoop,
}

impl AsciiState {
    fn expected(self) -> &'static str {
        match self {
            Self::ExpectSolid => "'solid'",
            Self::InSolid => "'facet normal' or 'endsolid'",
            Self::InFacet => "'outer loop'",
            Self::InLoop => "'vertex' or 'endloop'",
            Self::AfterLoop => "'endfacet'",
        }
    }
}

/// One line of an ASCII STL file.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Statement {
    Solid,
    Facet([f64; 3]),
    OuterLoop,
    Vertex([f64; 3]),
    EndLoop,
    EndFacet,
    EndSolid,
}

fn statement(input: &str) -> IResult<&str, Statement> {
    terminated(
        alt((
            value(Statement::EndSolid, pair(keyword("endsolid"), rest)),
            value(Statement::EndFacet, keyword("endfacet")),
            value(Statement::EndLoop, keyword("endloop")),
            value(
                Statement::OuterLoop,
                pair(keyword("outer"), preceded(space1, keyword("loop"))),
            ),
            value(Statement::Solid, pair(keyword("solid"), rest)),
            map(
                preceded(
                    pair(keyword("facet"), preceded(space1, keyword("normal"))),
                    vector3,
                ),
                Statement::Facet,
            ),
            map(preceded(keyword("vertex"), vector3), Statement::Vertex),
        )),
        space0,
    )(input)
}

/// A case-insensitive keyword that must end at whitespace or end of line.
fn keyword<'a>(word: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    terminated(tag_no_case(word), peek(alt((space1, eof))))
}

fn vector3(input: &str) -> IResult<&str, [f64; 3]> {
    let (input, x) = preceded(space1, double)(input)?;
    let (input, y) = preceded(space1, double)(input)?;
    let (input, z) = preceded(space1, double)(input)?;
    Ok((input, [x, y, z]))
}

fn excerpt(line: &str) -> String {
    const MAX: usize = 40;
    match line.char_indices().nth(MAX) {
        Some((cut, _)) => format!("{}...", &line[..cut]),
        None => line.to_string(),
    }
}

/// Encode a mesh as binary STL.
pub fn encode_binary(mesh: &Mesh) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE + COUNT_SIZE + mesh.triangle_count() * TRIANGLE_SIZE);

    let mut header = [0u8; HEADER_SIZE];
    let text = b"binary STL written by cadarena";
    header[..text.len()].copy_from_slice(text);
    out.extend_from_slice(&header);
    // Meshes hold at most MAX_TRIANGLES triangles, which fits the u32 field.
    let count = u32::try_from(mesh.triangle_count()).unwrap_or(u32::MAX);
    out.extend_from_slice(&count.to_le_bytes());

    for triangle in mesh.triangles() {
        let normal = mesh.face_normal(triangle).unwrap_or_else(Vector3::zeros);
        for c in normal.iter() {
            out.extend_from_slice(&(*c as f32).to_le_bytes());
        }
        for p in mesh.triangle_positions(triangle) {
            for c in p.coords.iter() {
                out.extend_from_slice(&(*c as f32).to_le_bytes());
            }
        }
        out.extend_from_slice(&0u16.to_le_bytes());
    }

    out
}

/// Encode a mesh as ASCII STL.
pub fn encode_ascii(mesh: &Mesh, name: &str) -> String {
    use std::fmt::Write;

    let mut out = String::new();
    let _ = writeln!(out, "solid {name}");
    for triangle in mesh.triangles() {
        let n = mesh.face_normal(triangle).unwrap_or_else(Vector3::zeros);
        let _ = writeln!(
            out,
            "  facet normal {} {} {}",
            n.x as f32, n.y as f32, n.z as f32
        );
        out.push_str("    outer loop\n");
        for p in mesh.triangle_positions(triangle) {
            let _ = writeln!(
                out,
                "      vertex {} {} {}",
                p.x as f32, p.y as f32, p.z as f32
            );
        }
        out.push_str("    endloop\n");
        out.push_str("  endfacet\n");
    }
    let _ = writeln!(out, "endsolid {name}");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const TRIANGLE: &str = "solid tri
  facet normal 0 0 1
    outer loop
      vertex 0 0 0
      vertex 1 0 0
      vertex 0 1 0
    endloop
  endfacet
endsolid tri
";

    fn binary_header(count: u32) -> Vec<u8> {
        let mut data = vec![0u8; HEADER_SIZE];
        data.extend_from_slice(&count.to_le_bytes());
        data
    }

    #[test]
    fn test_parse_binary_header() {
        let data = binary_header(0);
        let mesh = parse_binary_stl(&data).unwrap();
        assert_eq!(mesh.triangle_count(), 0);
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(detect_format(b"solid cube\n"), StlFormat::Ascii);
        assert_eq!(detect_format(b"  SOLID\tx"), StlFormat::Ascii);
        assert_eq!(detect_format(b"solid"), StlFormat::Ascii);
        assert_eq!(detect_format(b"solidworks export"), StlFormat::Binary);
        assert_eq!(detect_format(&binary_header(0)), StlFormat::Binary);
        assert_eq!(detect_format(b""), StlFormat::Binary);
    }

    #[test]
    fn test_binary_truncated() {
        let mut data = binary_header(2);
        data.extend_from_slice(&[0u8; TRIANGLE_SIZE]);
        let err = parse_binary_stl(&data).unwrap_err();
        assert_eq!(
            err,
            DecodeError::Format(FormatError::TruncatedFile {
                expected: 184,
                actual: 134
            })
        );
    }

    #[test]
    fn test_binary_huge_count_rejected_without_allocation() {
        let data = binary_header(u32::MAX);
        let err = parse_binary_stl(&data).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Format(FormatError::TruncatedFile { actual: 84, .. })
        ));
    }

    #[test]
    fn test_binary_short_header() {
        let err = parse_binary_stl(&[0u8; 10]).unwrap_err();
        assert_eq!(
            err,
            DecodeError::Format(FormatError::TruncatedFile {
                expected: 84,
                actual: 10
            })
        );
    }

    #[test]
    fn test_binary_round_trip_cube() {
        let cube = Mesh::cube(10.0);
        let data = encode_binary(&cube);
        assert_eq!(data.len(), 84 + 12 * 50);

        let mesh = parse_stl(&data).unwrap();
        assert_eq!(mesh.triangle_count(), 12);
        assert_eq!(mesh.vertex_count(), 36);
        assert_eq!(mesh.bounding_box(), cube.bounding_box());
    }

    #[test]
    fn test_binary_non_finite() {
        let mut data = binary_header(1);
        data.extend_from_slice(&[0u8; 12]);
        data.extend_from_slice(&f32::NAN.to_le_bytes());
        data.extend_from_slice(&[0u8; TRIANGLE_SIZE - 16]);
        let err = parse_binary_stl(&data).unwrap_err();
        assert_eq!(
            err,
            DecodeError::Format(FormatError::NonFiniteCoordinate { triangle: 0 })
        );
    }

    #[test]
    fn test_binary_triangle_limit() {
        let mut data = binary_header(3);
        data.extend_from_slice(&[0u8; 3 * TRIANGLE_SIZE]);
        let decoder = MeshDecoder::with_params(&DecodeParams::default().max_triangles(2));
        let err = decoder.decode(&data).unwrap_err();
        assert_eq!(
            err,
            DecodeError::Format(FormatError::TooManyTriangles { count: 3, limit: 2 })
        );
    }

    #[test]
    fn test_triangle_limit_capped_to_index_range() {
        let decoder = MeshDecoder::with_params(&DecodeParams::default().max_triangles(u64::MAX));
        assert_eq!(decoder.max_triangles, MAX_TRIANGLES);

        let decoder = MeshDecoder::with_params(&DecodeParams::default().max_triangles(5));
        assert_eq!(decoder.max_triangles, 5);
    }

    #[test]
    fn test_ascii_triangle_limit() {
        let text = format!("{TRIANGLE}{TRIANGLE}{TRIANGLE}");
        let decoder = MeshDecoder::with_params(&DecodeParams::default().max_triangles(2));
        assert_eq!(
            decoder.decode(text.as_bytes()).unwrap_err(),
            DecodeError::Format(FormatError::TooManyTriangles { count: 3, limit: 2 })
        );
    }

    #[test]
    fn test_parse_ascii_triangle() {
        let mesh = parse_ascii_stl(TRIANGLE).unwrap();
        assert_eq!(mesh.triangle_count(), 1);
        assert_eq!(mesh.vertices()[1].position, Point3::new(1.0, 0.0, 0.0));
        assert_eq!(mesh.triangles()[0].normal, Some(Vector3::z()));
    }

    #[test]
    fn test_parse_ascii_case_insensitive_and_crlf() {
        let text = TRIANGLE.to_uppercase().replace('\n', "\r\n");
        let mesh = parse_stl(text.as_bytes()).unwrap();
        assert_eq!(mesh.triangle_count(), 1);
    }

    #[test]
    fn test_parse_ascii_round_trip_cube() {
        let cube = Mesh::cube(3.0);
        let text = encode_ascii(&cube, "cube");
        let mesh = parse_stl(text.as_bytes()).unwrap();
        assert_eq!(mesh.triangle_count(), 12);
        assert_eq!(mesh.bounding_box(), cube.bounding_box());
    }

    #[test]
    fn test_parse_ascii_multiple_solids() {
        let text = format!("{TRIANGLE}{TRIANGLE}");
        let mesh = parse_ascii_stl(&text).unwrap();
        assert_eq!(mesh.triangle_count(), 2);
    }

    #[test]
    fn test_ascii_wrong_vertex_count() {
        let text = TRIANGLE.replacen("      vertex 0 1 0\n", "", 1);
        let err = parse_ascii_stl(&text).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Format(FormatError::MalformedSyntax { line: 6, .. })
        ));

        let text = TRIANGLE.replacen(
            "      vertex 0 1 0\n",
            "      vertex 0 1 0\n      vertex 1 1 0\n",
            1,
        );
        let err = parse_ascii_stl(&text).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Format(FormatError::MalformedSyntax { line: 7, .. })
        ));
    }

    #[test]
    fn test_ascii_missing_loop() {
        let text = TRIANGLE.replace("    outer loop\n", "");
        let err = parse_ascii_stl(&text).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Format(FormatError::MalformedSyntax { line: 3, .. })
        ));
    }

    #[test]
    fn test_ascii_non_numeric_coordinate() {
        let text = TRIANGLE.replace("vertex 1 0 0", "vertex 1 zero 0");
        let err = parse_ascii_stl(&text).unwrap_err();
        match err {
            DecodeError::Format(FormatError::MalformedSyntax { line, message }) => {
                assert_eq!(line, 5);
                assert!(message.contains("vertex 1 zero 0"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_ascii_non_finite_coordinate() {
        let text = TRIANGLE.replace("vertex 1 0 0", "vertex inf 0 0");
        assert!(matches!(
            parse_ascii_stl(&text).unwrap_err(),
            DecodeError::Format(FormatError::MalformedSyntax { line: 5, .. })
        ));
    }

    #[test]
    fn test_ascii_missing_endsolid() {
        let text = TRIANGLE.replace("endsolid tri\n", "");
        let err = parse_ascii_stl(&text).unwrap_err();
        match err {
            DecodeError::Format(FormatError::MalformedSyntax { message, .. }) => {
                assert!(message.contains("end of input"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_binary_with_solid_header_falls_back() {
        let cube = Mesh::cube(1.0);
        let mut data = encode_binary(&cube);
        data[..6].copy_from_slice(b"solid ");
        assert_eq!(detect_format(&data), StlFormat::Ascii);

        let mesh = parse_stl(&data).unwrap();
        assert_eq!(mesh.triangle_count(), 12);
    }

    #[test]
    fn test_expired_deadline() {
        let cube = Mesh::cube(1.0);
        let data = encode_binary(&cube);
        let decoder = MeshDecoder::new().with_deadline(Deadline::after(Duration::ZERO));
        assert_eq!(decoder.decode(&data).unwrap_err(), DecodeError::TimedOut);

        let text = encode_ascii(&cube, "cube");
        assert_eq!(
            decoder.decode(text.as_bytes()).unwrap_err(),
            DecodeError::TimedOut
        );
    }

    #[test]
    fn test_degenerate_triangles_retained() {
        let text = TRIANGLE.replace("vertex 0 1 0", "vertex 2 0 0");
        let mesh = parse_ascii_stl(&text).unwrap();
        assert_eq!(mesh.triangle_count(), 1);
    }
}

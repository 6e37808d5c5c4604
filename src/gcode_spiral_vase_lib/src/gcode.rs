use regex::Regex;
use std::ops::Range;
use std::sync::OnceLock;

use crate::Mm;

// Same precision slicers emit; anything finer is noise once it hits the printer.
const XYZ_DECIMAL_DIGITS: usize = 3;
const E_DECIMAL_DIGITS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
    E,
    F,
}

impl Axis {
    pub const ALL: [Axis; 5] = [Axis::X, Axis::Y, Axis::Z, Axis::E, Axis::F];

    fn index(self) -> usize {
        self as usize
    }

    pub fn letter(self) -> char {
        match self {
            Axis::X => 'X',
            Axis::Y => 'Y',
            Axis::Z => 'Z',
            Axis::E => 'E',
            Axis::F => 'F',
        }
    }

    fn from_letter(letter: char) -> Option<Axis> {
        match letter.to_ascii_uppercase() {
            'X' => Some(Axis::X),
            'Y' => Some(Axis::Y),
            'Z' => Some(Axis::Z),
            'E' => Some(Axis::E),
            'F' => Some(Axis::F),
            _ => None,
        }
    }

    fn decimal_digits(self) -> usize {
        match self {
            Axis::E => E_DECIMAL_DIGITS,
            _ => XYZ_DECIMAL_DIGITS,
        }
    }
}

fn line_regex() -> &'static Regex {
    static LINE: OnceLock<Regex> = OnceLock::new();
    // strip off the command and the comment
    LINE.get_or_init(|| {
        Regex::new(r"^\s*(?<cmd>[A-Za-z][0-9]+(?:\.[0-9]+)?)(?<params>[^;]*)(?<comment>;.*)?$").unwrap()
    })
}

fn word_regex() -> &'static Regex {
    static WORD: OnceLock<Regex> = OnceLock::new();
    WORD.get_or_init(|| {
        Regex::new(r"(?<letter>[A-Za-z])(?<value>[-+]?(?:[0-9]+(?:\.[0-9]*)?|\.[0-9]+))").unwrap()
    })
}

#[derive(Debug, Clone, PartialEq)]
struct Field {
    value: Mm,
    // byte range of the whole word (letter and number) within raw
    span: Range<usize>,
}

/// One line of G-code, split into command, axis fields, and trailing comment.
///
/// Field values are exactly what the line says; whether they are absolute or relative depends on
/// the [`GcodeReader`] state the line is interpreted against. Until [`GcodeLine::set`] is called,
/// [`GcodeLine::raw`] is the original text unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct GcodeLine {
    raw: String,
    cmd: Range<usize>,
    fields: [Option<Field>; 5],
    // where a new field gets inserted: just past the last word, before any comment
    params_end: usize,
    comment_start: Option<usize>,
}

impl GcodeLine {
    pub fn parse(raw: &str) -> GcodeLine {
        let mut line = GcodeLine {
            raw: raw.to_owned(),
            cmd: 0..0,
            fields: Default::default(),
            params_end: raw.len(),
            comment_start: None,
        };
        let Some(captures) = line_regex().captures(raw) else {
            // comment-only, blank, or something we don't understand; carried through verbatim
            line.comment_start = raw.find(';');
            return line;
        };
        let cmd = captures.name("cmd").unwrap();
        line.cmd = cmd.range();
        let params = captures.name("params").unwrap();
        line.params_end = params.start() + params.as_str().trim_end().len();
        line.comment_start = captures.name("comment").map(|m| m.start());
        for word in word_regex().captures_iter(params.as_str()) {
            let letter = word.name("letter").unwrap().as_str().chars().next().unwrap();
            let Some(axis) = Axis::from_letter(letter) else {
                continue;
            };
            if line.fields[axis.index()].is_some() {
                // first occurrence wins
                continue;
            }
            let Ok(value) = word.name("value").unwrap().as_str().parse::<Mm>() else {
                continue;
            };
            let whole = word.get(0).unwrap().range();
            line.fields[axis.index()] = Some(Field {
                value,
                span: (params.start() + whole.start)..(params.start() + whole.end),
            });
        }
        line
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn cmd(&self) -> &str {
        &self.raw[self.cmd.clone()]
    }

    pub fn cmd_is(&self, cmd: &str) -> bool {
        self.cmd().eq_ignore_ascii_case(cmd)
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment_start.map(|start| &self.raw[start..])
    }

    pub fn has(&self, axis: Axis) -> bool {
        self.fields[axis.index()].is_some()
    }

    /// The field's value as written, or 0 if absent.
    pub fn value(&self, axis: Axis) -> Mm {
        self.fields[axis.index()].as_ref().map_or(0.0, |f| f.value)
    }

    /// Absolute position of `axis` after this line, interpreted against `reader`'s current state.
    pub fn new_value(&self, reader: &GcodeReader, axis: Axis) -> Mm {
        let current = reader.position(axis);
        match &self.fields[axis.index()] {
            None => current,
            Some(field) if reader.is_relative(axis) => current + field.value,
            Some(field) => field.value,
        }
    }

    pub fn dist(&self, reader: &GcodeReader, axis: Axis) -> Mm {
        if !self.is_linear_move() || !self.has(axis) {
            return 0.0;
        }
        self.new_value(reader, axis) - reader.position(axis)
    }

    pub fn dist_xy(&self, reader: &GcodeReader) -> Mm {
        let dx = self.dist(reader, Axis::X);
        let dy = self.dist(reader, Axis::Y);
        (dx * dx + dy * dy).sqrt()
    }

    /// Signed.
    pub fn dist_z(&self, reader: &GcodeReader) -> Mm {
        self.dist(reader, Axis::Z)
    }

    pub fn dist_e(&self, reader: &GcodeReader) -> Mm {
        self.dist(reader, Axis::E)
    }

    pub fn extruding(&self, reader: &GcodeReader) -> bool {
        self.cmd_is("G1") && self.dist_e(reader) > 0.0
    }

    fn is_linear_move(&self) -> bool {
        self.cmd_is("G0") || self.cmd_is("G1")
    }

    /// Replace (or append) the `axis` field with `value`, regenerating the raw text. The value is
    /// written as given, so for a relative axis it's a relative amount.
    pub fn set(&mut self, axis: Axis, value: Mm) {
        let word = format!("{}{}", axis.letter(), format_decimal(value, axis.decimal_digits()));
        let mut new_raw = self.raw.clone();
        match &self.fields[axis.index()] {
            Some(field) => new_raw.replace_range(field.span.clone(), &word),
            None => new_raw.insert_str(self.params_end, &format!(" {}", word)),
        }
        *self = GcodeLine::parse(&new_raw);
    }
}

fn format_decimal(value: Mm, digits: usize) -> String {
    let mut s = format!("{:.*}", digits, value);
    if s.contains('.') {
        let trimmed_len = s.trim_end_matches('0').trim_end_matches('.').len();
        s.truncate(trimmed_len);
    }
    if s == "-0" {
        s = "0".to_owned();
    }
    s
}

/// Tracks the absolute machine position and positioning modes across lines.
///
/// Lines are interpreted against the reader as it was before the line, then [`GcodeReader::advance`]
/// applies the line. Cloning a reader is how a read-only look-ahead pass avoids disturbing the live
/// position.
#[derive(Debug, Clone)]
pub struct GcodeReader {
    // initially assumed 0,0,0 (ignoring homing which is assumed)
    position: [Mm; 5],
    is_abs_xyz: bool,
    is_rel_e: bool,
}

impl Default for GcodeReader {
    fn default() -> Self {
        GcodeReader {
            position: [0.0; 5],
            is_abs_xyz: true,
            is_rel_e: false,
        }
    }
}

impl GcodeReader {
    pub fn new() -> GcodeReader {
        GcodeReader::default()
    }

    /// Initial extrusion mode, for programs that never say M82/M83 themselves.
    pub fn with_relative_e(mut self, relative_e: bool) -> GcodeReader {
        self.is_rel_e = relative_e;
        self
    }

    pub fn position(&self, axis: Axis) -> Mm {
        self.position[axis.index()]
    }

    pub fn x(&self) -> Mm {
        self.position(Axis::X)
    }

    pub fn y(&self) -> Mm {
        self.position(Axis::Y)
    }

    pub fn z(&self) -> Mm {
        self.position(Axis::Z)
    }

    pub fn e(&self) -> Mm {
        self.position(Axis::E)
    }

    pub fn is_relative_e(&self) -> bool {
        self.is_rel_e
    }

    pub fn is_absolute_xyz(&self) -> bool {
        self.is_abs_xyz
    }

    fn is_relative(&self, axis: Axis) -> bool {
        match axis {
            Axis::E => self.is_rel_e,
            Axis::F => false,
            _ => !self.is_abs_xyz,
        }
    }

    pub fn parse_line(&self, raw: &str) -> GcodeLine {
        GcodeLine::parse(raw)
    }

    /// Apply `line`'s effect on position and modes.
    pub fn advance(&mut self, line: &GcodeLine) {
        if line.is_linear_move() || line.cmd_is("G2") || line.cmd_is("G3") {
            let mut new_position = self.position;
            for axis in Axis::ALL {
                new_position[axis.index()] = line.new_value(self, axis);
            }
            self.position = new_position;
        } else if line.cmd_is("G90") {
            // G90 also puts E back to absolute; M83 has to come after it.
            self.is_abs_xyz = true;
            self.is_rel_e = false;
        } else if line.cmd_is("G91") {
            self.is_abs_xyz = false;
            self.is_rel_e = true;
        } else if line.cmd_is("M82") {
            self.is_rel_e = false;
        } else if line.cmd_is("M83") {
            self.is_rel_e = true;
        } else if line.cmd_is("G92") {
            for axis in Axis::ALL {
                if line.has(axis) {
                    self.position[axis.index()] = line.value(axis);
                }
            }
        }
    }

    pub fn parse_buffer(&mut self, buffer: &str) {
        for raw in buffer.lines() {
            let line = self.parse_line(raw);
            self.advance(&line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn parses_command_fields_and_comment() {
        let line = GcodeLine::parse("G1 X10.5 Y-3 E.0421 F1800 ; perimeter");
        assert!(line.cmd_is("G1"));
        assert!(line.has(Axis::X));
        assert!(line.has(Axis::Y));
        assert!(!line.has(Axis::Z));
        assert_abs_diff_eq!(line.value(Axis::X), 10.5);
        assert_abs_diff_eq!(line.value(Axis::Y), -3.0);
        assert_abs_diff_eq!(line.value(Axis::E), 0.0421);
        assert_abs_diff_eq!(line.value(Axis::F), 1800.0);
        assert_eq!(line.comment(), Some("; perimeter"));
    }

    #[test]
    fn comment_and_blank_lines_have_no_command() {
        let comment = GcodeLine::parse(";LAYER_CHANGE");
        assert!(!comment.cmd_is("G1"));
        assert_eq!(comment.cmd(), "");
        assert_eq!(comment.comment(), Some(";LAYER_CHANGE"));

        let blank = GcodeLine::parse("");
        assert_eq!(blank.raw(), "");
        assert!(!blank.has(Axis::X));
    }

    #[test]
    fn words_in_comment_are_not_fields() {
        let line = GcodeLine::parse("G1 Z.4 ; X99 E5");
        assert!(line.has(Axis::Z));
        assert!(!line.has(Axis::X));
        assert!(!line.has(Axis::E));
        assert_abs_diff_eq!(line.value(Axis::Z), 0.4);
    }

    #[test]
    fn set_replaces_existing_field_in_place() {
        let mut line = GcodeLine::parse("G1 Z0.4 F7800 ; move up");
        line.set(Axis::Z, 5.6);
        assert_eq!(line.raw(), "G1 Z5.6 F7800 ; move up");
        assert_abs_diff_eq!(line.value(Axis::Z), 5.6);
    }

    #[test]
    fn set_appends_missing_field_before_comment() {
        let mut line = GcodeLine::parse("G1 X1 Y2 E0.5 ; wall");
        line.set(Axis::Z, 0.25);
        assert_eq!(line.raw(), "G1 X1 Y2 E0.5 Z0.25 ; wall");

        let mut line = GcodeLine::parse("G1 X1 Y2 E0.5");
        line.set(Axis::Z, 7.0);
        assert_eq!(line.raw(), "G1 X1 Y2 E0.5 Z7");
    }

    #[test]
    fn set_uses_axis_precision() {
        let mut line = GcodeLine::parse("G1 X1 Y2 E0.5");
        line.set(Axis::E, 0.123456789);
        line.set(Axis::X, 1.23456);
        assert_eq!(line.raw(), "G1 X1.235 Y2 E0.12346");
        line.set(Axis::E, -0.0);
        assert_eq!(line.raw(), "G1 X1.235 Y2 E0");
    }

    #[test]
    fn untouched_line_keeps_original_text() {
        let raw = "G1  X1.000   Y2.50 E0.0300  ;odd spacing";
        let line = GcodeLine::parse(raw);
        assert_eq!(line.raw(), raw);
    }

    #[test]
    fn reader_tracks_absolute_xyz_and_relative_e() {
        let mut reader = GcodeReader::new();
        reader.parse_buffer("G90\nM83\nG1 X10 Y0 E1\nG1 X10 Y5 E0.5\n");
        assert_abs_diff_eq!(reader.x(), 10.0);
        assert_abs_diff_eq!(reader.y(), 5.0);
        assert_abs_diff_eq!(reader.e(), 1.5);
        assert!(reader.is_relative_e());
        assert!(reader.is_absolute_xyz());
    }

    #[test]
    fn displacements_are_relative_to_reader_position() {
        let mut reader = GcodeReader::new().with_relative_e(true);
        reader.parse_buffer("G1 X1 Y1 Z2");
        let line = reader.parse_line("G1 X4 Y5 E0.2");
        assert_abs_diff_eq!(line.dist_xy(&reader), 5.0);
        assert_abs_diff_eq!(line.dist_z(&reader), 0.0);
        assert!(line.extruding(&reader));

        let travel = reader.parse_line("G1 X4 Y5");
        assert!(!travel.extruding(&reader));

        let down = reader.parse_line("G1 Z1.5");
        assert_abs_diff_eq!(down.dist_z(&reader), -0.5);
    }

    #[test]
    fn absolute_e_extrusion_is_a_positive_delta() {
        let mut reader = GcodeReader::new();
        reader.parse_buffer("M82\nG92 E0\nG1 X1 E2");
        let retract = reader.parse_line("G1 E1.2");
        assert!(!retract.extruding(&reader));
        let extrude = reader.parse_line("G1 X2 E2.5");
        assert!(extrude.extruding(&reader));
        assert_abs_diff_eq!(extrude.dist_e(&reader), 0.5);
    }

    #[test]
    fn relative_xyz_accumulates() {
        let mut reader = GcodeReader::new();
        reader.parse_buffer("G1 X1 Y1\nG91\nG1 X2 Y-1\nG1 Z0.2");
        assert_abs_diff_eq!(reader.x(), 3.0);
        assert_abs_diff_eq!(reader.y(), 0.0);
        assert_abs_diff_eq!(reader.z(), 0.2);
        assert!(reader.is_relative_e());
    }

    #[test]
    fn g92_resets_only_named_axes() {
        let mut reader = GcodeReader::new();
        reader.parse_buffer("G1 X5 Y5 E10\nG92 E0");
        assert_abs_diff_eq!(reader.e(), 0.0);
        assert_abs_diff_eq!(reader.x(), 5.0);
    }
}

use tracing::{debug, warn};

use crate::config::SpiralVaseConfig;
use crate::gcode::{Axis, GcodeLine, GcodeReader};
use crate::geometry::Point;
use crate::nearest::ReferenceFinder;
use crate::{Factor, Mm};

/// What one read-only pass over a layer finds out before anything gets rewritten.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct LayerMeasurement {
    /// XY length of all extruding moves.
    pub total_xy_length: Mm,
    /// Sum of Z moves that don't extrude.
    pub total_z_height: Mm,
    /// Z at the bottom of the layer, where the ramp starts.
    pub start_z: Mm,
}

impl LayerMeasurement {
    /// Scan `gcode` on a copy of `reader`, so the live position isn't disturbed.
    pub fn measure(reader: &GcodeReader, gcode: &str) -> LayerMeasurement {
        let mut reader = reader.clone();
        let mut measurement = LayerMeasurement::default();
        let mut top_z: Option<Mm> = None;
        for raw in gcode.lines() {
            let line = reader.parse_line(raw);
            if line.cmd_is("G1") {
                if line.extruding(&reader) {
                    measurement.total_xy_length += line.dist_xy(&reader);
                } else if line.has(Axis::Z) {
                    measurement.total_z_height += line.dist_z(&reader);
                    if top_z.is_none() {
                        top_z = Some(line.new_value(&reader, Axis::Z));
                    }
                }
            }
            reader.advance(&line);
        }
        // The layer's Z move goes to the top of the layer; the ramp starts a layer height below.
        measurement.start_z = top_z.unwrap_or(reader.z()) - measurement.total_z_height;
        measurement
    }

    /// Z rise per mm of XY extrusion, `None` for a layer that doesn't extrude anywhere.
    pub fn height_per_length(&self) -> Option<Factor> {
        (self.total_xy_length > 0.0).then(|| self.total_z_height / self.total_xy_length)
    }
}

/// Which special layer, if any, this call is. Decided by the caller, who knows the job's layer
/// count; the transformer itself never counts layers.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LayerFlags {
    /// First spiralized layer: extrusion ramps up from zero over the layer.
    pub transition_layer: bool,
    /// Last layer of the job: a trailing pass ramps extrusion down to zero at constant Z.
    pub last_layer: bool,
}

/// Turns stacked per-layer loops into one continuous helix, one layer per call.
///
/// Every layer of the job goes through [`SpiralVase::process_layer`] in order, including the ones
/// that aren't transformed, so the reader always knows the machine position. Each layer is expected
/// to be a single loop with one Z move at its start.
pub struct SpiralVase {
    config: SpiralVaseConfig,
    reader: GcodeReader,
    // XY targets of the previous transformed layer's extruding moves, in emission order.
    previous_layer: Option<Vec<Point>>,
}

impl SpiralVase {
    pub fn new(config: SpiralVaseConfig) -> SpiralVase {
        let reader = GcodeReader::new().with_relative_e(config.use_relative_e);
        SpiralVase { config, reader, previous_layer: None }
    }

    pub fn config(&self) -> &SpiralVaseConfig {
        &self.config
    }

    pub fn enable(&mut self, enabled: bool) {
        self.config.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn reader(&self) -> &GcodeReader {
        &self.reader
    }

    pub fn previous_layer(&self) -> Option<&[Point]> {
        self.previous_layer.as_deref()
    }

    pub fn process_layer(&mut self, gcode: &str, flags: LayerFlags) -> String {
        // If we're not going to modify G-code, just feed it to the reader in order to update
        // positions.
        if !self.config.enabled {
            self.reader.parse_buffer(gcode);
            return gcode.to_owned();
        }

        let measurement = LayerMeasurement::measure(&self.reader, gcode);
        debug!(
            total_xy_length = measurement.total_xy_length,
            total_z_height = measurement.total_z_height,
            start_z = measurement.start_z,
            transition_layer = flags.transition_layer,
            last_layer = flags.last_layer,
            "spiralizing layer"
        );

        if measurement.height_per_length().is_none() {
            warn!(start_z = measurement.start_z, "layer has no extruding XY moves, passing it through unchanged");
            self.reader.parse_buffer(gcode);
            self.previous_layer = Some(Vec::new());
            return gcode.to_owned();
        }

        let previous_layer = self.previous_layer.take();
        let finder = match (&previous_layer, self.config.smooth_xy) {
            (Some(points), true) => Some(self.config.reference_search.build(points, self.config.max_xy_smoothing)),
            _ => None,
        };
        // Tapering extrusion only works with relative E amounts; with absolute E every later line
        // of the job would have to be shifted as well. The program's own M82/M83 has the last word.
        let relative_e = self.config.use_relative_e && self.reader.is_relative_e();
        if self.config.use_relative_e && !relative_e {
            warn!("layer is in absolute E mode (M82), extrusion is left as is");
        }
        let transition = flags.transition_layer && relative_e;
        let mut rewriter = LayerRewriter {
            measurement,
            transition,
            ramp_down: flags.last_layer && !transition && relative_e,
            rescale_e: relative_e,
            finder: finder.as_deref(),
            len: 0.0,
            // Travel moves get dropped, so a layer's first extrusion starts from wherever the
            // previous layer ended.
            last_point: previous_layer.as_ref().and_then(|points| points.last().copied()),
            output: String::with_capacity(gcode.len()),
            ramp_down_output: String::new(),
            current_layer: Vec::new(),
        };
        for raw in gcode.lines() {
            rewriter.rewrite_line(&mut self.reader, raw);
        }
        let LayerRewriter { mut output, ramp_down_output, current_layer, .. } = rewriter;
        if flags.last_layer && !flags.transition_layer && !relative_e {
            warn!("final layer extrusion ramp-down needs relative E distances, skipped");
        }
        output.push_str(&ramp_down_output);

        // The previous layer's points are dropped here; only this layer's are kept.
        self.previous_layer = Some(current_layer);
        output
    }
}

// Per-call state of the second pass over a layer.
struct LayerRewriter<'a> {
    measurement: LayerMeasurement,
    transition: bool,
    ramp_down: bool,
    rescale_e: bool,
    finder: Option<&'a dyn ReferenceFinder>,
    // XY extrusion length so far this layer
    len: Mm,
    last_point: Option<Point>,
    output: String,
    ramp_down_output: String,
    current_layer: Vec<Point>,
}

impl LayerRewriter<'_> {
    fn rewrite_line(&mut self, reader: &mut GcodeReader, raw: &str) {
        let mut line = reader.parse_line(raw);
        if line.cmd_is("G1") {
            let extruding = line.extruding(reader);
            if line.has(Axis::Z) && !extruding {
                // The layer's initial Z move. Replace it with a (redundant) move to where the
                // previous layer's ramp ended, which is this layer's entry Z.
                reader.advance(&line);
                line.set(Axis::Z, self.measurement.start_z);
                self.emit(&line);
                return;
            }
            let dist_xy = line.dist_xy(reader);
            if dist_xy > 0.0 {
                if !extruding {
                    // Skip travel moves: the move to first perimeter point would cause a visible
                    // seam when loops are not aligned in XY. By skipping it we blend the first loop
                    // move in the XY plane, although the smoothness of that blend depends on how
                    // long the first segment is.
                    reader.advance(&line);
                    return;
                }
                let target = Point::new(line.new_value(reader, Axis::X), line.new_value(reader, Axis::Y));
                reader.advance(&line);
                self.rewrite_extrusion(line, dist_xy, target);
                return;
            }
        }
        reader.advance(&line);
        self.output.push_str(raw);
        self.output.push('\n');
        if self.ramp_down {
            self.ramp_down_output.push_str(raw);
            self.ramp_down_output.push('\n');
        }
    }

    fn rewrite_extrusion(&mut self, mut line: GcodeLine, dist_xy: Mm, target: Point) {
        self.len += dist_xy;
        let factor: Factor = self.len / self.measurement.total_xy_length;

        if self.transition && line.has(Axis::E) {
            // Transition layer, ramp the amount of extrusion from zero to the nominal value.
            line.set(Axis::E, line.value(Axis::E) * factor);
        } else if self.ramp_down {
            // Ramp the last layer's extrusion down to zero without touching Z: a copy of the move,
            // taken before Z is set, is replayed after the layer at the height the ramp ended on.
            let mut ramp_down_line = line.clone();
            ramp_down_line.set(Axis::E, line.value(Axis::E) * (1.0 - factor));
            self.ramp_down_output.push_str(ramp_down_line.raw());
            self.ramp_down_output.push('\n');
        }

        // This is the core of spiral vase mode, ramp Z up smoothly.
        line.set(Axis::Z, self.measurement.start_z + factor * self.measurement.total_z_height);

        // Smoothing only ever looks at the previous layer; what gets stored for the next layer is
        // the unmodified target.
        self.current_layer.push(target);
        let mut emitted = target;
        if let Some(reference) = self.finder.and_then(|finder| finder.find_reference(target)) {
            // Early in the layer stay close to the previous layer's path, late in the layer get
            // close to where this layer actually wants to be.
            emitted = target.lerp(reference.point, factor);
            line.set(Axis::X, emitted.x);
            line.set(Axis::Y, emitted.y);
            if self.rescale_e {
                if let Some(last_point) = self.last_point {
                    // Keep extrusion per length the same along the moved segment.
                    let modified_dist_xy = emitted.distance(last_point);
                    line.set(Axis::E, line.value(Axis::E) * modified_dist_xy / dist_xy);
                }
            }
        }
        self.last_point = Some(emitted);

        self.emit(&line);
    }

    fn emit(&mut self, line: &GcodeLine) {
        self.output.push_str(line.raw());
        self.output.push('\n');
    }
}

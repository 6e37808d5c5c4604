use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::JobConfig;
use crate::error::Result;
use crate::gcode::GcodeReader;
use crate::spiral_vase::{LayerFlags, SpiralVase};

// A whole program cut at layer boundaries. The pieces are contiguous, so concatenating them gives
// back the input.
#[derive(Debug, PartialEq)]
struct SplitProgram<'a> {
    preamble: &'a str,
    layers: Vec<&'a str>,
    trailer: &'a str,
    // false when the trailer was cut after the last extrusion instead of at the end marker
    end_marker_found: bool,
}

impl<'a> SplitProgram<'a> {
    fn split(gcode: &'a str, layer_change_marker: &str, end_marker: &str, relative_e: bool) -> SplitProgram<'a> {
        let mut reader = GcodeReader::new().with_relative_e(relative_e);
        let mut layer_starts: Vec<usize> = vec![];
        let mut end_marker_start = None;
        let mut last_extrusion_end = None;
        let mut offset = 0;
        for line in gcode.split_inclusive('\n') {
            if line.starts_with(layer_change_marker) {
                layer_starts.push(offset);
            } else if !layer_starts.is_empty() && line.starts_with(end_marker) {
                end_marker_start = Some(offset);
                break;
            }
            offset += line.len();
            let parsed = reader.parse_line(line.trim_end_matches(['\r', '\n']));
            if !layer_starts.is_empty() && parsed.extruding(&reader) {
                last_extrusion_end = Some(offset);
            }
            reader.advance(&parsed);
        }
        // Without an end marker, whatever follows the last extrusion is end G-code; a Z lift in
        // there must not become part of the last layer's ramp.
        let last_layer_start = layer_starts.last().copied().unwrap_or(gcode.len());
        let trailer_start = end_marker_start
            .or(last_extrusion_end.filter(|end| *end > last_layer_start))
            .unwrap_or(gcode.len());
        let preamble_end = layer_starts.first().copied().unwrap_or(trailer_start);
        let mut layers = Vec::with_capacity(layer_starts.len());
        for (i, start) in layer_starts.iter().enumerate() {
            let end = layer_starts.get(i + 1).copied().unwrap_or(trailer_start);
            layers.push(&gcode[*start..end]);
        }
        SplitProgram {
            preamble: &gcode[..preamble_end],
            layers,
            trailer: &gcode[trailer_start..],
            end_marker_found: end_marker_start.is_some(),
        }
    }
}

/// Runs a complete G-code program through one [`SpiralVase`], layer by layer.
///
/// Layers below `first_spiral_layer` print as they are. The first spiralized layer tapers its
/// extrusion in and the program's last layer tapers it out.
pub struct SpiralVaseJob {
    config: JobConfig,
}

impl SpiralVaseJob {
    pub fn new(config: JobConfig) -> SpiralVaseJob {
        SpiralVaseJob { config }
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    pub fn process_gcode(&self, gcode: &str) -> String {
        let program = SplitProgram::split(
            gcode,
            &self.config.layer_change_marker,
            &self.config.end_marker,
            self.config.spiral.use_relative_e,
        );
        if program.layers.is_empty() {
            warn!(marker = %self.config.layer_change_marker, "no layer change markers found, nothing to spiralize");
        } else if !program.end_marker_found {
            warn!(marker = %self.config.end_marker, "no end marker found, end G-code starts after the last extrusion");
        }
        let first_spiral_layer = self.config.first_spiral_layer;
        let last_layer = program.layers.len().saturating_sub(1);
        debug!(layers = program.layers.len(), first_spiral_layer, "split program");

        let mut vase = SpiralVase::new(self.config.spiral.clone());
        let mut output = String::with_capacity(gcode.len() + gcode.len() / 8);

        // Start and end G-code only go through to keep the position current.
        vase.enable(false);
        output.push_str(&vase.process_layer(program.preamble, LayerFlags::default()));
        for (index, layer) in program.layers.iter().enumerate() {
            let enabled = self.config.spiral.enabled && index >= first_spiral_layer;
            vase.enable(enabled);
            let flags = LayerFlags {
                transition_layer: enabled && index == first_spiral_layer,
                last_layer: enabled && index == last_layer,
            };
            output.push_str(&vase.process_layer(layer, flags));
        }
        vase.enable(false);
        output.push_str(&vase.process_layer(program.trailer, LayerFlags::default()));
        output
    }

    /// `output` may be the same file as `input`; it's only replaced once the whole result exists.
    pub fn process_files(&self, input: impl AsRef<Path>, output: impl AsRef<Path>) -> Result<()> {
        let input = input.as_ref();
        let output = output.as_ref();

        info!(input = %input.display(), "reading gcode");
        let gcode = fs::read_to_string(input)?;

        let before_process = Instant::now();
        let spiralized = self.process_gcode(&gcode);
        info!(elapsed = ?before_process.elapsed(), bytes = spiralized.len(), "done spiralizing");

        let mut tmp_output = PathBuf::from(output);
        tmp_output.as_mut_os_string().push(".tmp");
        fs::write(&tmp_output, spiralized)?;
        if let Err(err) = fs::rename(&tmp_output, output) {
            // leave the original output alone, and no half-finished leftovers next to it
            let _ = fs::remove_file(&tmp_output);
            return Err(err.into());
        }
        info!(output = %output.display(), "wrote gcode");
        Ok(())
    }
}

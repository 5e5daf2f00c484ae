use std::io::Write;

use crate::model::{Observation, Reconstruction};
use crate::ReconstructionError;

/// Write a reconstruction as whitespace separated text.
///
/// Layout, one record per line:
///
/// ```text
/// <camera count>
/// <K row-major, 9 values> <extrinsics row-major, 16 values> <image name>   per camera
/// <point count>
/// <x y z w> <object id> <r g b> <observation count>                        per point
/// <frame> <feature index> <x y> <object id> <r g b> <size> <orientation> <distance>
///     <descriptor length> <descriptor...>                                   per observation
/// ```
pub fn write_reconstruction<W: Write>(
    reconstruction: &Reconstruction,
    mut writer: W,
) -> Result<(), ReconstructionError> {
    writeln!(writer, "{}", reconstruction.cameras.len())?;
    for camera in &reconstruction.cameras {
        let k = camera.intrinsics.matrix().transpose().to_cols_array();
        let rt = camera.extrinsics.transpose().to_cols_array();
        let values: Vec<String> = k.iter().chain(rt.iter()).map(|v| v.to_string()).collect();
        writeln!(writer, "{} {}", values.join(" "), camera.image_name)?;
    }

    writeln!(writer, "{}", reconstruction.points.len())?;
    for point in &reconstruction.points {
        let p = point.position;
        let [r, g, b] = point.color;
        writeln!(
            writer,
            "{} {} {} {} {} {r} {g} {b} {}",
            p.x,
            p.y,
            p.z,
            p.w,
            point.object_id,
            point.observations.len()
        )?;
        for observation in &point.observations {
            write_observation(&mut writer, observation)?;
        }
    }
    writer.flush()?;
    Ok(())
}

fn write_observation<W: Write>(writer: &mut W, observation: &Observation) -> std::io::Result<()> {
    let f = &observation.feature;
    let [r, g, b] = f.color;
    write!(
        writer,
        "{} {} {} {} {} {r} {g} {b} {} {} {} {}",
        observation.frame,
        observation.feature_index,
        f.position.x,
        f.position.y,
        f.object_id,
        f.size,
        f.orientation,
        f.distance,
        f.descriptor.len()
    )?;
    for v in &f.descriptor {
        write!(writer, " {v}")?;
    }
    writeln!(writer)
}

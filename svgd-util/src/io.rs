use crate::particles::ParameterSet;
use candle_core::DType;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Open a buffered writer
/// * `output_file` - `stdout`, `stderr`, or a file name (gzipped if it ends in `.gz`)
pub fn open_buf_writer(output_file: &str) -> anyhow::Result<Box<dyn Write>> {
    if output_file.eq_ignore_ascii_case("stdout") {
        return Ok(Box::new(BufWriter::new(std::io::stdout())));
    }

    if output_file.eq_ignore_ascii_case("stderr") {
        return Ok(Box::new(BufWriter::new(std::io::stderr())));
    }

    let ext = Path::new(output_file).extension().and_then(|x| x.to_str());
    let file = File::create(output_file)?;
    match ext {
        Some("gz") => {
            let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            Ok(Box::new(BufWriter::new(encoder)))
        }
        _ => Ok(Box::new(BufWriter::new(file))),
    }
}

/// Create the parent directory of `file` if needed
pub fn mkdir(file: &str) -> anyhow::Result<()> {
    if let Some(dir) = Path::new(file).parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
        }
    }
    Ok(())
}

///
/// Write one tab-separated row per particle, its flattened parameters
/// in slot order.
///
/// * `particles` - current ensemble
/// * `output_file` - `stdout`, `stderr`, or a file name (gzipped if it ends in `.gz`)
///
pub fn write_particles(particles: &[ParameterSet], output_file: &str) -> anyhow::Result<()> {
    let mut buf = open_buf_writer(output_file)?;
    for p in particles {
        let row = p.flatten()?.to_dtype(DType::F32)?.to_vec1::<f32>()?;
        let line = row
            .iter()
            .map(|x| x.to_string())
            .collect::<Vec<_>>()
            .join("\t");
        if let Err(e) = writeln!(buf, "{}", line) {
            if e.kind() == std::io::ErrorKind::BrokenPipe {
                return Ok(());
            }
            return Err(e.into());
        }
    }
    buf.flush()?;
    Ok(())
}

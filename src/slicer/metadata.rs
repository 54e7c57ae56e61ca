//! Reading predictions back out of a sliced 3MF archive.

use std::{
    io::{BufRead, BufReader},
    path::Path,
};

use anyhow::{Context, Result};

use super::SlicedMetadata;

/// The gcode of the first plate inside a sliced archive.
const PLATE_GCODE: &str = "Metadata/plate_1.gcode";
const DURATION_MARKER: &str = "total estimated time: ";
const WEIGHT_MARKER: &str = "total filament weight [g] : ";

/// Read the estimated duration and filament weight of plate 1 of a sliced
/// archive.
pub async fn read_metadata(path: &Path) -> Result<SlicedMetadata> {
    let path = path.to_owned();
    tokio::task::spawn_blocking(move || read_metadata_blocking(&path))
        .await
        .context("metadata reader panicked")?
}

fn read_metadata_blocking(path: &Path) -> Result<SlicedMetadata> {
    let file = std::fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut archive = zip::ZipArchive::new(file).with_context(|| format!("{} is not a 3mf archive", path.display()))?;
    let gcode = archive
        .by_name(PLATE_GCODE)
        .with_context(|| format!("{} has no {}", path.display(), PLATE_GCODE))?;

    parse_header(BufReader::new(gcode))
}

fn parse_header(reader: impl BufRead) -> Result<SlicedMetadata> {
    let mut duration = None;
    let mut weight = None;

    for line in reader.lines() {
        let line = line?;
        if duration.is_none() {
            if let Some(index) = line.rfind(DURATION_MARKER) {
                duration = Some(parse_duration(&line[index + DURATION_MARKER.len()..])?);
            }
        }
        if weight.is_none() {
            if let Some(index) = line.rfind(WEIGHT_MARKER) {
                weight = line[index + WEIGHT_MARKER.len()..].trim().parse::<f64>().ok();
            }
        }
        if duration.is_some() && weight.is_some() {
            break;
        }
    }

    let duration_seconds = duration.context("gcode header has no total estimated time")?;
    let weight_grams = weight.unwrap_or_else(|| {
        tracing::warn!("gcode header has no filament weight, reporting 0");
        0.0
    });

    Ok(SlicedMetadata {
        duration_seconds,
        weight_grams,
    })
}

/// Parse a slicer duration such as `1d 2h 3m 4s` into seconds. Missing
/// units count as zero and unknown text is skipped. A duration that does
/// not fit in a `u64` is an error.
pub fn parse_duration(input: &str) -> Result<u64> {
    let mut total: u64 = 0;
    let mut digits = String::new();

    for c in input.trim().chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }

        let unit = match c {
            'd' => Some(86_400),
            'h' => Some(3_600),
            'm' => Some(60),
            's' => Some(1),
            _ => None,
        };
        if let Some(unit) = unit {
            if !digits.is_empty() {
                let seconds = digits
                    .parse::<u64>()
                    .ok()
                    .and_then(|value| value.checked_mul(unit))
                    .and_then(|seconds| total.checked_add(seconds));
                total = seconds.with_context(|| format!("duration {:?} is out of range", input.trim()))?;
            }
        }
        digits.clear();
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Write};

    use pretty_assertions::assert_eq;
    use testresult::TestResult;

    use super::*;
    use crate::TemporaryFile;

    const HEADER: &str = "; HEADER_BLOCK_START\n\
        ; BambuStudio 01.09.00.70\n\
        ; model printing time: 1h 2m 3s; total estimated time: 1h 8m 19s\n\
        ; total layer number: 150\n\
        ; total filament weight [g] : 12.34\n\
        ; HEADER_BLOCK_END\n\
        G28\n";

    #[test]
    fn test_parse_duration() -> TestResult {
        assert_eq!(parse_duration("1d 2h 3m 4s")?, 93_784);
        assert_eq!(parse_duration("8m 19s")?, 499);
        assert_eq!(parse_duration("45s")?, 45);
        assert_eq!(parse_duration("2h")?, 7_200);
        assert_eq!(parse_duration("")?, 0);
        Ok(())
    }

    #[test]
    fn test_parse_duration_out_of_range() {
        assert!(parse_duration("99999999999999999d").is_err());
        assert!(parse_duration("99999999999999999999999s").is_err());
        assert!(parse_duration("18446744073709551615s 1s").is_err());
    }

    #[test]
    fn test_header_with_huge_time_is_an_error() {
        let header = "; total estimated time: 99999999999999999d\n; total filament weight [g] : 1.0\n";
        assert!(parse_header(Cursor::new(header)).is_err());
    }

    #[test]
    fn test_parse_header() -> TestResult {
        let metadata = parse_header(Cursor::new(HEADER))?;
        assert_eq!(
            metadata,
            SlicedMetadata {
                duration_seconds: 4_099,
                weight_grams: 12.34,
            }
        );
        Ok(())
    }

    #[test]
    fn test_header_without_time_is_an_error() {
        assert!(parse_header(Cursor::new("; total filament weight [g] : 1.0\n")).is_err());
    }

    #[tokio::test]
    async fn test_read_metadata_from_archive() -> TestResult {
        let mut buffer = Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buffer);
            zip.start_file(PLATE_GCODE, zip::write::SimpleFileOptions::default())?;
            zip.write_all(HEADER.as_bytes())?;
            zip.finish()?;
        }
        let archive = TemporaryFile::create("3mf", buffer.into_inner()).await?;

        let metadata = read_metadata(archive.path()).await?;
        assert_eq!(metadata.duration_seconds, 4_099);
        Ok(())
    }
}

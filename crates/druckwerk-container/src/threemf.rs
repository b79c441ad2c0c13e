// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// G-code ↔ 3MF conversion.
//
// A 3MF container is a ZIP archive with two OPC manifests, a minimal model
// definition, a vendor settings entry, and the machine code itself under
// Metadata/.  Bambu firmware locates the plate G-code by entry name, so the
// names below are load-bearing.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info, warn};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use druckwerk_core::error::{DruckwerkError, Result};

use crate::metadata::ContainerMetadata;

/// Required OPC content-types manifest.
pub const CONTENT_TYPES_ENTRY: &str = "[Content_Types].xml";
/// Required OPC relationships manifest.
pub const RELATIONSHIPS_ENTRY: &str = "_rels/.rels";
/// Minimal model-definition entry the relationships manifest points at.
pub const MODEL_ENTRY: &str = "3D/3dmodel.model";
/// Vendor settings entry.
pub const SETTINGS_ENTRY: &str = "Metadata/model_settings.config";
/// The machine-code payload.
pub const GCODE_ENTRY: &str = "Metadata/plate_1.gcode";
/// Optional plate thumbnail.
pub const THUMBNAIL_ENTRY: &str = "Metadata/plate_1.png";

/// Packages machine code into 3MF containers and back.
#[derive(Debug, Default)]
pub struct ContainerConverter;

impl ContainerConverter {
    pub fn new() -> Self {
        Self
    }

    /// Build a 3MF container from a raw machine-code file.
    ///
    /// Appends a `.3mf` extension when the output path lacks one and returns
    /// the actual path written.  Fails if the machine-code source does not
    /// exist.
    pub fn pack(
        &self,
        machine_code_path: &Path,
        output_path: &Path,
        metadata: &ContainerMetadata,
    ) -> Result<PathBuf> {
        if !machine_code_path.exists() {
            return Err(DruckwerkError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("machine code file not found: {}", machine_code_path.display()),
            )));
        }

        let output_path = ensure_3mf_extension(output_path);
        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent)?;
        }

        info!(
            source = %machine_code_path.display(),
            output = %output_path.display(),
            "packing machine code into 3MF container"
        );

        let machine_code = fs::read(machine_code_path)?;

        let file = File::create(&output_path)?;
        let mut zip = ZipWriter::new(file);
        let options: FileOptions<()> =
            FileOptions::default().compression_method(CompressionMethod::Deflated);

        write_entry(&mut zip, CONTENT_TYPES_ENTRY, content_types_xml().as_bytes(), options)?;
        write_entry(&mut zip, RELATIONSHIPS_ENTRY, relationships_xml().as_bytes(), options)?;
        write_entry(&mut zip, MODEL_ENTRY, model_xml(metadata).as_bytes(), options)?;
        write_entry(&mut zip, SETTINGS_ENTRY, settings_xml(metadata).as_bytes(), options)?;
        write_entry(&mut zip, GCODE_ENTRY, &machine_code, options)?;

        if let Some(thumb) = &metadata.thumbnail_path {
            if thumb.exists() {
                let bytes = fs::read(thumb)?;
                write_entry(&mut zip, THUMBNAIL_ENTRY, &bytes, options)?;
            } else {
                warn!(path = %thumb.display(), "thumbnail not found, skipping");
            }
        }

        zip.finish()
            .map_err(|e| DruckwerkError::ContainerFormat(format!("finish archive: {e}")))?;

        info!(output = %output_path.display(), "3MF container written");
        Ok(output_path)
    }

    /// Extract the machine-code entry from a container.
    ///
    /// Fails if the archive holds no `.gcode` entry.
    pub fn unpack(&self, container_path: &Path, output_path: &Path) -> Result<PathBuf> {
        let mut archive = open_archive(container_path)?;

        let gcode_name = archive
            .file_names()
            .find(|name| name.ends_with(".gcode"))
            .map(str::to_owned)
            .ok_or_else(|| {
                DruckwerkError::ContainerFormat(format!(
                    "no machine-code entry in {}",
                    container_path.display()
                ))
            })?;

        debug!(entry = %gcode_name, "extracting machine code");

        let mut entry = archive
            .by_name(&gcode_name)
            .map_err(|e| DruckwerkError::ContainerFormat(format!("read entry {gcode_name}: {e}")))?;
        let mut machine_code = Vec::new();
        entry.read_to_end(&mut machine_code)?;

        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(output_path, &machine_code)?;

        info!(
            container = %container_path.display(),
            output = %output_path.display(),
            bytes = machine_code.len(),
            "machine code extracted from container"
        );
        Ok(output_path.to_path_buf())
    }

    /// Whether the archive is a plausible printer container: both manifests
    /// present, plus at least one of a model entry or a machine-code entry.
    pub fn validate(&self, container_path: &Path) -> bool {
        let archive = match open_archive(container_path) {
            Ok(a) => a,
            Err(e) => {
                warn!(path = %container_path.display(), error = %e, "container failed to open");
                return false;
            }
        };

        let names: Vec<&str> = archive.file_names().collect();

        for required in [CONTENT_TYPES_ENTRY, RELATIONSHIPS_ENTRY] {
            if !names.contains(&required) {
                warn!(missing = required, "container missing required manifest");
                return false;
            }
        }

        let has_model = names.iter().any(|n| n.ends_with(".model"));
        let has_gcode = names.iter().any(|n| n.ends_with(".gcode"));
        if !(has_model || has_gcode) {
            warn!("container has neither a model entry nor machine code");
            return false;
        }

        true
    }
}

fn open_archive(path: &Path) -> Result<ZipArchive<File>> {
    if !path.exists() {
        return Err(DruckwerkError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("container not found: {}", path.display()),
        )));
    }
    let file = File::open(path)?;
    ZipArchive::new(file)
        .map_err(|e| DruckwerkError::ContainerFormat(format!("not a ZIP archive: {e}")))
}

fn write_entry(
    zip: &mut ZipWriter<File>,
    name: &str,
    bytes: &[u8],
    options: FileOptions<()>,
) -> Result<()> {
    zip.start_file(name, options)
        .map_err(|e| DruckwerkError::ContainerFormat(format!("start entry {name}: {e}")))?;
    zip.write_all(bytes)
        .map_err(|e| DruckwerkError::ContainerFormat(format!("write entry {name}: {e}")))?;
    Ok(())
}

fn ensure_3mf_extension(path: &Path) -> PathBuf {
    match path.extension() {
        Some(ext) if ext == "3mf" => path.to_path_buf(),
        _ => {
            let mut s = path.as_os_str().to_owned();
            s.push(".3mf");
            PathBuf::from(s)
        }
    }
}

// ---------------------------------------------------------------------------
// Manifest construction
// ---------------------------------------------------------------------------

fn content_types_xml() -> String {
    concat!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n",
        "<Types xmlns=\"http://schemas.openxmlformats.org/package/2006/content-types\">",
        "<Default Extension=\"rels\" ContentType=\"application/vnd.openxmlformats-package.relationships+xml\" />",
        "<Default Extension=\"model\" ContentType=\"application/vnd.ms-package.3dmanufacturing-3dmodel+xml\" />",
        "<Default Extension=\"png\" ContentType=\"image/png\" />",
        "<Default Extension=\"gcode\" ContentType=\"text/x.gcode\" />",
        "<Default Extension=\"config\" ContentType=\"text/xml\" />",
        "</Types>"
    )
    .to_string()
}

fn relationships_xml() -> String {
    concat!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n",
        "<Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">",
        "<Relationship Target=\"/3D/3dmodel.model\" Id=\"rel0\" ",
        "Type=\"http://schemas.microsoft.com/3dmanufacturing/2013/01/3dmodel\" />",
        "</Relationships>"
    )
    .to_string()
}

fn model_xml(metadata: &ContainerMetadata) -> String {
    format!(
        concat!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n",
            "<model unit=\"millimeter\" xml:lang=\"en-US\" ",
            "xmlns=\"http://schemas.microsoft.com/3dmanufacturing/core/2015/02\" ",
            "xmlns:p=\"http://schemas.microsoft.com/3dmanufacturing/production/2015/06\">",
            "<metadata name=\"Application\">{app}</metadata>",
            "<resources />",
            "<build />",
            "</model>"
        ),
        app = xml_escape(&metadata.application),
    )
}

fn settings_xml(metadata: &ContainerMetadata) -> String {
    format!(
        concat!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n",
            "<config>",
            "<printer>{printer}</printer>",
            "<layer_height>{layer_height}</layer_height>",
            "<fill_density>{infill}</fill_density>",
            "<print_speed>{speed}</print_speed>",
            "<support>{support}</support>",
            "<filament_type>{material}</filament_type>",
            "<nozzle_temperature>{nozzle}</nozzle_temperature>",
            "<bed_temperature>{bed}</bed_temperature>",
            "<timestamp>{timestamp}</timestamp>",
            "</config>"
        ),
        printer = xml_escape(&metadata.printer_model),
        layer_height = metadata.layer_height,
        infill = metadata.infill_density,
        speed = metadata.print_speed,
        support = metadata.support_enabled,
        material = metadata.material_name(),
        nozzle = metadata.nozzle_temperature,
        bed = metadata.bed_temperature,
        timestamp = Utc::now().to_rfc3339(),
    )
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use druckwerk_core::types::SliceConfig;
    use tempfile::tempdir;

    fn test_metadata() -> ContainerMetadata {
        ContainerMetadata::from_slice_config(&SliceConfig::standard(), "Bambu Lab H2D")
    }

    #[test]
    fn pack_then_unpack_round_trips_machine_code() {
        let dir = tempdir().expect("tempdir");
        let gcode_path = dir.path().join("part.gcode");
        let gcode = b"G28\nG1 X10 Y10 F3000\nM104 S210\n";
        fs::write(&gcode_path, gcode).expect("write gcode");

        let converter = ContainerConverter::new();
        let container = converter
            .pack(&gcode_path, &dir.path().join("part.3mf"), &test_metadata())
            .expect("pack");

        let extracted = converter
            .unpack(&container, &dir.path().join("out.gcode"))
            .expect("unpack");

        let round_tripped = fs::read(extracted).expect("read extracted");
        assert_eq!(round_tripped, gcode);
    }

    #[test]
    fn packed_container_validates() {
        let dir = tempdir().expect("tempdir");
        let gcode_path = dir.path().join("part.gcode");
        fs::write(&gcode_path, "G28\n").expect("write gcode");

        let converter = ContainerConverter::new();
        let container = converter
            .pack(&gcode_path, &dir.path().join("part.3mf"), &test_metadata())
            .expect("pack");

        assert!(converter.validate(&container));
    }

    #[test]
    fn pack_appends_3mf_extension() {
        let dir = tempdir().expect("tempdir");
        let gcode_path = dir.path().join("part.gcode");
        fs::write(&gcode_path, "G28\n").expect("write gcode");

        let container = ContainerConverter::new()
            .pack(&gcode_path, &dir.path().join("part"), &test_metadata())
            .expect("pack");
        assert_eq!(container.extension().unwrap(), "3mf");
    }

    #[test]
    fn pack_fails_when_machine_code_missing() {
        let dir = tempdir().expect("tempdir");
        let result = ContainerConverter::new().pack(
            &dir.path().join("missing.gcode"),
            &dir.path().join("out.3mf"),
            &test_metadata(),
        );
        assert!(matches!(result, Err(DruckwerkError::Io(_))));
    }

    #[test]
    fn validate_rejects_archive_missing_relationships() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("bad.3mf");

        // Archive with the content-types manifest but no _rels/.rels.
        let file = File::create(&path).expect("create");
        let mut zip = ZipWriter::new(file);
        let options: FileOptions<()> = FileOptions::default();
        zip.start_file(CONTENT_TYPES_ENTRY, options).expect("entry");
        zip.write_all(content_types_xml().as_bytes()).expect("write");
        zip.start_file(GCODE_ENTRY, options).expect("entry");
        zip.write_all(b"G28\n").expect("write");
        zip.finish().expect("finish");

        assert!(!ContainerConverter::new().validate(&path));
    }

    #[test]
    fn validate_rejects_archive_with_no_model_or_gcode() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("empty.3mf");

        let file = File::create(&path).expect("create");
        let mut zip = ZipWriter::new(file);
        let options: FileOptions<()> = FileOptions::default();
        zip.start_file(CONTENT_TYPES_ENTRY, options).expect("entry");
        zip.write_all(content_types_xml().as_bytes()).expect("write");
        zip.start_file(RELATIONSHIPS_ENTRY, options).expect("entry");
        zip.write_all(relationships_xml().as_bytes()).expect("write");
        zip.finish().expect("finish");

        assert!(!ContainerConverter::new().validate(&path));
    }

    #[test]
    fn validate_rejects_non_zip_file() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("not-a-zip.3mf");
        fs::write(&path, "plain text").expect("write");
        assert!(!ContainerConverter::new().validate(&path));
    }

    #[test]
    fn unpack_fails_without_machine_code_entry() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("no-gcode.3mf");

        let file = File::create(&path).expect("create");
        let mut zip = ZipWriter::new(file);
        let options: FileOptions<()> = FileOptions::default();
        zip.start_file(CONTENT_TYPES_ENTRY, options).expect("entry");
        zip.write_all(content_types_xml().as_bytes()).expect("write");
        zip.start_file(RELATIONSHIPS_ENTRY, options).expect("entry");
        zip.write_all(relationships_xml().as_bytes()).expect("write");
        zip.finish().expect("finish");

        let result =
            ContainerConverter::new().unpack(&path, &dir.path().join("out.gcode"));
        assert!(matches!(result, Err(DruckwerkError::ContainerFormat(_))));
    }

    #[test]
    fn thumbnail_is_embedded_when_present() {
        let dir = tempdir().expect("tempdir");
        let gcode_path = dir.path().join("part.gcode");
        fs::write(&gcode_path, "G28\n").expect("write gcode");
        let thumb_path = dir.path().join("plate.png");
        fs::write(&thumb_path, [0x89, b'P', b'N', b'G']).expect("write thumb");

        let mut metadata = test_metadata();
        metadata.thumbnail_path = Some(thumb_path);

        let container = ContainerConverter::new()
            .pack(&gcode_path, &dir.path().join("part.3mf"), &metadata)
            .expect("pack");

        let mut archive = ZipArchive::new(File::open(container).expect("open")).expect("zip");
        assert!(archive.by_name(THUMBNAIL_ENTRY).is_ok());
    }
}

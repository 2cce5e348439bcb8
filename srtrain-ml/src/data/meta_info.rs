//! Meta-info files: one `<relative path> (<h>,<w>,<c>)` line per GT image.
//!
//! Only image headers are read, so large folders are indexed quickly.

use std::io::Read;
use std::path::Path;

use tracing::info;
use walkdir::WalkDir;

use super::netpbm;
use crate::error::MlError;

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];

/// Image geometry read from a file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

/// PNG colour type to channel count; only `L` and `RGB` are accepted.
fn png_channels(color_type: u8) -> Result<usize, MlError> {
    match color_type {
        0 => Ok(1),
        2 => Ok(3),
        4 => Err(MlError::codec("Unsupported mode LA.")),
        6 => Err(MlError::codec("Unsupported mode RGBA.")),
        3 => Err(MlError::codec("Unsupported mode P.")),
        other => Err(MlError::codec(format!("Unknown PNG colour type {other}."))),
    }
}

fn parse_png(header: &[u8]) -> Result<ImageInfo, MlError> {
    // signature, IHDR length, "IHDR", width, height, bit depth, colour type
    if header.len() < 26 || &header[12..16] != b"IHDR" {
        return Err(MlError::codec("PNG without IHDR chunk"));
    }
    let be32 = |at: usize| u32::from_be_bytes([header[at], header[at + 1], header[at + 2], header[at + 3]]);
    Ok(ImageInfo {
        width: be32(16) as usize,
        height: be32(20) as usize,
        channels: png_channels(header[25])?,
    })
}

/// Read height, width and channel count from a PNG or netpbm header.
pub fn read_image_info(path: &Path) -> Result<ImageInfo, MlError> {
    let mut header = Vec::with_capacity(512);
    std::fs::File::open(path)?
        .take(512)
        .read_to_end(&mut header)?;
    let info = if header.starts_with(&PNG_SIGNATURE) {
        parse_png(&header)
    } else {
        netpbm::parse_header(&header).map(|h| ImageInfo {
            height: h.height,
            width: h.width,
            channels: h.channels,
        })
    };
    info.map_err(|e| MlError::codec(format!("{}: {e}", path.display())))
}

fn is_image(path: &Path) -> bool {
    netpbm::is_netpbm(path)
        || path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("png"))
}

/// Render the meta-info lines for every image under `gt_folder`, sorted by
/// relative path.
pub fn meta_info_lines(gt_folder: &Path) -> Result<Vec<String>, MlError> {
    if !gt_folder.is_dir() {
        return Err(MlError::not_found(format!("{}", gt_folder.display())));
    }
    let mut entries = Vec::new();
    for entry in WalkDir::new(gt_folder) {
        let entry = entry.map_err(|e| MlError::dataset(e.to_string()))?;
        if entry.file_type().is_file() && is_image(entry.path()) {
            if let Ok(rel) = entry.path().strip_prefix(gt_folder) {
                entries.push((rel.to_string_lossy().replace('\\', "/"), entry.into_path()));
            }
        }
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    entries
        .into_iter()
        .enumerate()
        .map(|(idx, (rel, path))| {
            let ImageInfo { height, width, channels } = read_image_info(&path)?;
            let line = format!("{rel} ({height},{width},{channels})");
            info!("{} {}", idx + 1, line);
            Ok(line)
        })
        .collect()
}

/// Write the meta-info file for `gt_folder` to `output`; returns the number
/// of images indexed.
pub fn generate_meta_info(gt_folder: &Path, output: &Path) -> Result<usize, MlError> {
    let lines = meta_info_lines(gt_folder)?;
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut text = lines.join("\n");
    if !text.is_empty() {
        text.push('\n');
    }
    srtrain_core::persistence::atomic_write(output, text.as_bytes())?;
    Ok(lines.len())
}

//! Binary netpbm (`P5` gray / `P6` RGB, 8-bit) reader and writer.

use std::path::Path;

use super::image::Image;
use crate::error::MlError;

/// Header fields of a netpbm file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetpbmHeader {
    pub channels: usize,
    pub width: usize,
    pub height: usize,
    pub maxval: usize,
    pub data_offset: usize,
}

fn next_token(bytes: &[u8], pos: &mut usize) -> Option<String> {
    loop {
        while *pos < bytes.len() && bytes[*pos].is_ascii_whitespace() {
            *pos += 1;
        }
        if *pos < bytes.len() && bytes[*pos] == b'#' {
            while *pos < bytes.len() && bytes[*pos] != b'\n' {
                *pos += 1;
            }
            continue;
        }
        break;
    }
    let start = *pos;
    while *pos < bytes.len() && !bytes[*pos].is_ascii_whitespace() {
        *pos += 1;
    }
    (start < *pos).then(|| String::from_utf8_lossy(&bytes[start..*pos]).into_owned())
}

pub fn parse_header(bytes: &[u8]) -> Result<NetpbmHeader, MlError> {
    let mut pos = 0;
    let magic = next_token(bytes, &mut pos).ok_or_else(|| MlError::codec("empty file"))?;
    let channels = match magic.as_str() {
        "P5" => 1,
        "P6" => 3,
        other => return Err(MlError::codec(format!("unsupported netpbm magic {other}"))),
    };
    let mut field = |name: &str| -> Result<usize, MlError> {
        next_token(bytes, &mut pos)
            .and_then(|t| t.parse().ok())
            .ok_or_else(|| MlError::codec(format!("bad netpbm {name}")))
    };
    let width = field("width")?;
    let height = field("height")?;
    let maxval = field("maxval")?;
    if maxval == 0 || maxval > 255 {
        return Err(MlError::codec(format!("unsupported maxval {maxval}")));
    }
    // exactly one whitespace byte separates the header from the raster
    let data_offset = pos + 1;
    Ok(NetpbmHeader {
        channels,
        width,
        height,
        maxval,
        data_offset,
    })
}

pub fn decode(bytes: &[u8]) -> Result<Image, MlError> {
    let header = parse_header(bytes)?;
    let n = header.channels * header.width * header.height;
    let raster = bytes
        .get(header.data_offset..header.data_offset + n)
        .ok_or_else(|| MlError::codec("truncated raster"))?;
    let mut img = Image::zeros(header.channels, header.height, header.width);
    let scale = header.maxval as f32;
    for (i, &b) in raster.iter().enumerate() {
        let c = i % header.channels;
        let p = i / header.channels;
        img.set(c, p / header.width, p % header.width, b as f32 / scale);
    }
    Ok(img)
}

pub fn encode(img: &Image) -> Result<Vec<u8>, MlError> {
    let magic = match img.channels {
        1 => "P5",
        3 => "P6",
        c => return Err(MlError::codec(format!("cannot encode {c}-channel image"))),
    };
    let mut out = format!("{magic}\n{} {}\n255\n", img.width, img.height).into_bytes();
    out.reserve(img.data.len());
    for y in 0..img.height {
        for x in 0..img.width {
            for c in 0..img.channels {
                out.push((img.get(c, y, x).clamp(0.0, 1.0) * 255.0).round() as u8);
            }
        }
    }
    Ok(out)
}

pub fn read(path: &Path) -> Result<Image, MlError> {
    let bytes = std::fs::read(path)?;
    decode(&bytes).map_err(|e| MlError::codec(format!("{}: {e}", path.display())))
}

pub fn write(path: &Path, img: &Image) -> Result<(), MlError> {
    let bytes = encode(img)?;
    srtrain_core::persistence::atomic_write(path, &bytes)?;
    Ok(())
}

pub fn is_netpbm(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("ppm" | "pgm")
    )
}

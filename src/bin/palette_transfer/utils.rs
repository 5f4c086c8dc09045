use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{codecs::jpeg::JpegEncoder, ColorType, ImageEncoder};

use num_traits::ToPrimitive;
use palette_transfer::Point;

#[derive(Debug, Clone, Copy)]
pub enum Mode {
    Resynthesize,
    Posterize,
}

impl std::str::FromStr for Mode {
    type Err = palette_transfer::error::PtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            s if s.eq_ignore_ascii_case("resynthesize") => Ok(Self::Resynthesize),
            s if s.eq_ignore_ascii_case("posterize") => Ok(Self::Posterize),
            _ => Err(Self::Err::General("Invalid remap mode")),
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Resynthesize => write!(f, "resynthesize"),
            Self::Posterize => write!(f, "posterize"),
        }
    }
}

// Decode an image file into packed 0xFFRRGGBB words.
pub fn load_image_packed(
    path: &std::path::Path,
) -> Result<(usize, usize, Vec<u32>), Box<dyn std::error::Error>> {
    let rgb = image::open(path)?.into_rgb8();
    let (width, height) = rgb.dimensions();
    let mut packed = Vec::new();
    packed.try_reserve_exact(rgb.as_raw().len() / 3)?;
    packed.extend(rgb.as_raw().chunks_exact(3).map(|px| {
        0xFF00_0000 | (u32::from(px[0]) << 16) | (u32::from(px[1]) << 8) | u32::from(px[2])
    }));
    Ok((width as usize, height as usize, packed))
}

// Palettes from two unrelated images are aligned by sorting both on
// perceptual luminance, so dark colors map to dark and light to light.
pub fn sort_by_luminance(palette: &mut [Point]) {
    palette.sort_by(|a, b| {
        let la = 0.299 * a.c1 + 0.587 * a.c2 + 0.114 * a.c3;
        let lb = 0.299 * b.c1 + 0.587 * b.c2 + 0.114 * b.c3;
        la.total_cmp(&lb)
    });
}

// Create a file name displaying the mode, `k`, and seed used.
pub fn generate_filename(opt: &crate::args::Opt) -> Result<String, Box<dyn std::error::Error>> {
    let mut filename = opt
        .input
        .file_stem()
        .ok_or("No file stem")?
        .to_str()
        .ok_or("Could not convert file stem to string")?
        .to_string();

    let format =
        if opt.format.eq_ignore_ascii_case("jpg") || opt.format.eq_ignore_ascii_case("jpeg") {
            "jpg"
        } else {
            opt.format.as_str()
        };

    use std::fmt::Write;
    write!(
        &mut filename,
        "-{mode}-{k}-{seed}.{format}",
        mode = opt.mode,
        k = opt.k,
        seed = opt.seed
    )?;

    Ok(filename)
}

// Saves packed pixels to file.
pub fn save_image(
    output: &std::path::Path,
    pixels: &[u32],
    width: usize,
    height: usize,
    quality: u8,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut imgbuf = Vec::new();
    imgbuf.try_reserve_exact(pixels.len() * 3)?;
    for &p in pixels {
        imgbuf.push(((p >> 16) & 0xFF).to_u8().ok_or("Invalid red channel")?);
        imgbuf.push(((p >> 8) & 0xFF).to_u8().ok_or("Invalid green channel")?);
        imgbuf.push((p & 0xFF).to_u8().ok_or("Invalid blue channel")?);
    }

    let w = std::io::BufWriter::new(std::fs::File::create(output)?);
    let width = u32::try_from(width)?;
    let height = u32::try_from(height)?;

    // Save as jpg if it matches the extension
    if let Some(ext) = output.extension() {
        if ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg") {
            let mut encoder = JpegEncoder::new_with_quality(w, quality.clamp(1, 100));

            if let Err(err) = encoder.encode(&imgbuf, width, height, ColorType::Rgb8) {
                eprintln!("palette_transfer: {}", err);
                std::fs::remove_file(output)?;
            }

            return Ok(());
        }
    }

    // Sub filter seemed to result in better filesize compared to Adaptive
    let encoder = PngEncoder::new_with_quality(w, CompressionType::Best, FilterType::Sub);

    // Clean up if file is created but there's a problem writing to it
    if let Err(err) = encoder.write_image(&imgbuf, width, height, ColorType::Rgb8) {
        eprintln!("palette_transfer: {}", err);
        std::fs::remove_file(output)?;
    }

    Ok(())
}

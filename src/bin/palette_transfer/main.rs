mod args;
mod utils;

use crate::args::Opt;
use crate::utils::{generate_filename, load_image_packed, save_image, sort_by_luminance, Mode};

use clap::Parser;

use palette_transfer::image::sample_packed_pixels;
use palette_transfer::{color, hybrid, posterize_image, resynthesize_image, Point};
use std::fmt::Write;

fn main() {
    env_logger::Builder::from_default_env().init();

    if let Err(e) = try_main() {
        eprintln!("palette_transfer: {}", e);
        std::process::exit(1);
    }
}

// Extract a k-color palette from sampled pixels, optionally clustering
// in CIELAB and converting the centroids back afterwards.
fn extract_palette(
    pixels: &[u32],
    opt: &Opt,
    eps: f32,
) -> Result<Vec<Point>, Box<dyn std::error::Error>> {
    let sampled = sample_packed_pixels(pixels, opt.sample, opt.seed)?;
    let points = if opt.lab {
        color::rgb_to_lab_batch(&sampled)
    } else {
        sampled
    };

    // Epsilon is calibrated in RGB units; CIELAB distances run smaller
    // by roughly the component range ratio.
    let eps = if opt.lab { (eps * 0.4).max(2.0) } else { eps };

    let result = hybrid::hybrid_cluster(
        &points,
        usize::try_from(opt.k)?,
        opt.block_size,
        eps,
        opt.min_pts,
        opt.iter,
        opt.threshold,
        opt.seed,
    )?;

    let centroids = if opt.lab {
        color::lab_to_rgb_batch(&result.centroids)
    } else {
        result.centroids
    };

    Ok(centroids)
}

fn remap(
    opt: &Opt,
    pixels: &[u32],
    width: usize,
    height: usize,
    target: &[Point],
    source: &[Point],
) -> Result<Vec<u32>, Box<dyn std::error::Error>> {
    if opt.gpu {
        #[cfg(feature = "opencl")]
        {
            if matches!(opt.mode, Mode::Posterize) {
                return Err("GPU path only supports resynthesize mode".into());
            }
            let out = palette_transfer::opencl::opencl_resynthesize_image(
                pixels, width, height, target, source,
            )?;
            return Ok(out);
        }
        #[cfg(not(feature = "opencl"))]
        return Err("Built without the opencl feature".into());
    }

    let out = match opt.mode {
        Mode::Resynthesize => resynthesize_image(pixels, width, height, target, source)?,
        Mode::Posterize => posterize_image(pixels, width, height, target, source)?,
    };
    Ok(out)
}

fn try_main() -> Result<(), Box<dyn std::error::Error>> {
    let opt = Opt::parse();

    let output_image = if let Some(output) = opt.output.clone() {
        output
    } else {
        generate_filename(&opt)?.into()
    };

    let (width, height, input_pixels) = load_image_packed(&opt.input)?;
    let (_, _, exemplar_pixels) = load_image_packed(&opt.exemplar)?;

    let mut display_string = String::new();

    let eps = opt.eps.unwrap_or_else(|| {
        hybrid::calculate_block_eps(
            // Estimating from the input image is enough; the exemplar
            // shares the block size and threshold.
            &sample_packed_pixels(&input_pixels, opt.sample, opt.seed).unwrap_or_default(),
            opt.block_size,
            opt.min_pts,
            opt.seed,
        )
    });

    let t0 = std::time::Instant::now();
    let mut target = extract_palette(&input_pixels, &opt, eps)?;
    let mut source = extract_palette(&exemplar_pixels, &opt, eps)?;
    if opt.verbose {
        write!(
            &mut display_string,
            "palettes: {}/{} colors, eps {eps:.1}, {:?}",
            target.len(),
            source.len(),
            t0.elapsed()
        )?;
    }

    // The clustering orders of two unrelated images are incomparable;
    // align the pair on luminance before pairing indices.
    sort_by_luminance(&mut target);
    sort_by_luminance(&mut source);
    let paired = target.len().min(source.len());
    target.truncate(paired);
    source.truncate(paired);

    let t0 = std::time::Instant::now();
    let output_pixels = remap(&opt, &input_pixels, width, height, &target, &source)?;
    if opt.verbose {
        write!(&mut display_string, ", {} {:?}", opt.mode, t0.elapsed())?;
        #[cfg(feature = "opencl")]
        if opt.gpu {
            if let Some(name) = palette_transfer::opencl::opencl_device_name() {
                write!(&mut display_string, " on {name}")?;
            }
        }
    }

    save_image(
        output_image.as_ref(),
        &output_pixels,
        width,
        height,
        opt.quality,
    )?;

    #[cfg(feature = "opencl")]
    if opt.gpu {
        palette_transfer::opencl::opencl_cleanup();
    }

    if opt.verbose {
        println!("{display_string}");
    }

    Ok(())
}

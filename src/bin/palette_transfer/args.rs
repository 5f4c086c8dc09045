use clap::Parser;

#[derive(Debug, Parser)]
#[clap(version, about, long_about = None)]
pub struct Opt {
    /// Image to recolor.
    #[clap(short, long, parse(from_os_str))]
    pub input: std::path::PathBuf,

    /// Image supplying the palette to apply.
    #[clap(short, long, parse(from_os_str))]
    pub exemplar: std::path::PathBuf,

    /// Output file, defaults to PNG image output.
    #[clap(short, long, parse(from_os_str))]
    pub output: Option<std::path::PathBuf>,

    /// Number of palette colors to extract.
    #[clap(short, short_alias = 'n', default_value_t = 16)]
    pub k: u32,

    /// Remap mode, either resynthesize (keep texture) or posterize.
    #[clap(short, long, default_value = "resynthesize")]
    pub mode: crate::utils::Mode,

    /// Pixels sampled from each image before clustering.
    #[clap(long, default_value_t = 65_536)]
    pub sample: usize,

    /// Block size for the per-block density stage.
    #[clap(long, default_value_t = 256)]
    pub block_size: usize,

    /// DBSCAN neighborhood radius; estimated from the data when omitted.
    #[clap(long)]
    pub eps: Option<f32>,

    /// DBSCAN core-point threshold.
    #[clap(long, default_value_t = 4)]
    pub min_pts: usize,

    /// Maximum k-means iterations.
    #[clap(long, default_value_t = 50)]
    pub iter: u32,

    /// K-means convergence threshold, in channel units.
    #[clap(long, default_value_t = 0.1)]
    pub threshold: f32,

    /// Seed for all random draws; a run is reproducible per seed.
    #[clap(long, default_value_t = 42)]
    pub seed: u64,

    /// Cluster in CIELAB instead of RGB.
    #[clap(long)]
    pub lab: bool,

    /// Remap on the GPU (requires the opencl build feature).
    #[clap(long)]
    pub gpu: bool,

    /// Save as a JPG or PNG file.
    #[clap(long, default_value = "png")]
    pub format: String,

    /// JPEG quality, 1 to 100.
    #[clap(long, default_value_t = 90)]
    pub quality: u8,

    /// Print palette size, timing, and device information.
    #[clap(short, long)]
    pub verbose: bool,
}

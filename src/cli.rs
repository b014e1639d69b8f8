use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::annotate::BorderSides;
use crate::deskew::{DeskewConfig, DEFAULT_THRESHOLDS};
use crate::skew::SkewSearchParams;

#[derive(Parser, Debug)]
#[command(name = "skewmark")]
#[command(version, about = "Deskew binary scans and report which marks changed")]
pub struct Cli {
    /// Show pipeline details
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the bit depth (1, 8 or 32) of an image
    Depth {
        /// Input image path
        input: PathBuf,
    },

    /// Deskew a binary image at one threshold and report what changed
    Deskew {
        /// Binary input image path
        input: PathBuf,

        /// Binarization threshold after rotation (0-255)
        #[arg(value_parser = parse_threshold)]
        threshold: u8,

        /// Output directory [default: next to the input]
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        #[command(flatten)]
        tuning: TuningArgs,
    },

    /// Deskew once and binarize at several thresholds, one report each
    Sweep {
        /// Binary input image path
        input: PathBuf,

        /// Binarization thresholds, in report order
        #[arg(short, long = "threshold", value_parser = parse_threshold, default_values_t = DEFAULT_THRESHOLDS)]
        thresholds: Vec<u8>,

        /// Image each threshold's output is compared against
        #[arg(long, value_enum, default_value_t = Baseline::Direct)]
        baseline: Baseline,

        /// Output directory [default: next to the input]
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        #[command(flatten)]
        tuning: TuningArgs,
    },

    /// Write a diff report for two binary images of the same size
    Diff {
        /// Original binary image
        original: PathBuf,

        /// Updated binary image
        updated: PathBuf,

        /// Multi-page TIFF report to write
        report: PathBuf,

        /// Prefix of the report's summary caption
        #[arg(long, default_value = "")]
        tag: String,

        /// Dot only the top and left edges of each mark box
        #[arg(long)]
        two_sided_markers: bool,
    },
}

/// Baseline for the threshold sweep
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Baseline {
    /// The unrotated input
    Original,
    /// The input rotated directly in 1 bpp by sampling
    Direct,
}

/// Estimator and policy tuning shared by the deskewing commands
#[derive(Args, Debug, Clone)]
pub struct TuningArgs {
    /// Half-width of the swept angle range, degrees
    #[arg(long, default_value = "5.0")]
    pub sweep_range: f64,

    /// Spacing of swept angles, degrees
    #[arg(long, default_value = "1.0")]
    pub sweep_delta: f64,

    /// Downscale factor for the sweep (1, 2, 4 or 8)
    #[arg(long, default_value = "2", value_parser = parse_reduction)]
    pub sweep_reduction: u32,

    /// Downscale factor for the search (1, 2, 4 or 8)
    #[arg(long, default_value = "2", value_parser = parse_reduction)]
    pub search_reduction: u32,

    /// Smallest angle step of the search, degrees
    #[arg(long, default_value = "0.01")]
    pub search_min_delta: f64,

    /// Skews below this many degrees are left alone
    #[arg(long, default_value = "0.1")]
    pub min_angle: f64,

    /// Estimates with lower confidence are not acted on
    #[arg(long, default_value = "3.0")]
    pub min_confidence: f64,

    /// Dot only the top and left edges of each mark box
    #[arg(long)]
    pub two_sided_markers: bool,

    /// Also write the gray, smoothed and rotated gray stages
    #[arg(long)]
    pub save_intermediates: bool,
}

impl TuningArgs {
    pub fn deskew_config(&self) -> DeskewConfig {
        DeskewConfig {
            search: SkewSearchParams {
                sweep_range: self.sweep_range,
                sweep_delta: self.sweep_delta,
                sweep_reduction: self.sweep_reduction,
                search_reduction: self.search_reduction,
                search_min_delta: self.search_min_delta,
            },
            min_angle: self.min_angle,
            min_confidence: self.min_confidence,
            keep_intermediates: self.save_intermediates,
        }
    }

    pub fn border_sides(&self) -> BorderSides {
        border_sides(self.two_sided_markers)
    }
}

pub fn border_sides(two_sided: bool) -> BorderSides {
    if two_sided {
        BorderSides::TopLeft
    } else {
        BorderSides::All
    }
}

/// Output file naming relative to an input image
#[derive(Debug, Clone)]
pub struct OutputNames {
    dir: PathBuf,
    stem: String,
}

impl OutputNames {
    pub fn new(input: &Path, output_dir: Option<&Path>) -> Self {
        let stem = input.file_stem().unwrap_or_default().to_string_lossy().into_owned();
        let dir = output_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| input.parent().unwrap_or(Path::new(".")).to_path_buf());
        Self { dir, stem }
    }

    /// `<stem>-deskewed-<t>.tif`
    pub fn deskewed(&self, threshold: u8) -> PathBuf {
        self.dir.join(format!("{}-deskewed-{}.tif", self.stem, threshold))
    }

    /// `<stem>-deskewed-<t>-diff.tif`
    pub fn deskewed_diff(&self, threshold: u8) -> PathBuf {
        self.dir.join(format!("{}-deskewed-{}-diff.tif", self.stem, threshold))
    }

    /// `<stem>-am-bw.tif`, the directly rotated baseline
    pub fn direct_baseline(&self) -> PathBuf {
        self.dir.join(format!("{}-am-bw.tif", self.stem))
    }

    /// `<stem>-gray.tif`, the input as 8-bit gray
    pub fn gray_stage(&self) -> PathBuf {
        self.dir.join(format!("{}-gray.tif", self.stem))
    }

    /// `<stem>-blockconv11.tif`, the gray stage after 3x3 smoothing
    pub fn smoothed_stage(&self) -> PathBuf {
        self.dir.join(format!("{}-blockconv11.tif", self.stem))
    }

    /// `<stem>-am.tif`, the smoothed stage after area-map rotation
    pub fn rotated_stage(&self) -> PathBuf {
        self.dir.join(format!("{}-am.tif", self.stem))
    }

    /// `<stem>-am-bw<t>.tif`
    pub fn swept(&self, threshold: u8) -> PathBuf {
        self.dir.join(format!("{}-am-bw{}.tif", self.stem, threshold))
    }

    /// `<stem>-am-bw<t>-diff.tif`
    pub fn swept_diff(&self, threshold: u8) -> PathBuf {
        self.dir.join(format!("{}-am-bw{}-diff.tif", self.stem, threshold))
    }
}

/// Report tag used for a threshold, e.g. `"Threshold 130 "`
pub fn threshold_tag(threshold: u8) -> String {
    format!("Threshold {} ", threshold)
}

fn parse_threshold(s: &str) -> Result<u8, String> {
    let value: i64 = s
        .trim()
        .parse()
        .map_err(|_| format!("Invalid threshold: {}", s))?;
    u8::try_from(value).map_err(|_| "threshold must be between 0 and 255".to_string())
}

fn parse_reduction(s: &str) -> Result<u32, String> {
    let value: u32 = s
        .parse()
        .map_err(|_| format!("Invalid reduction factor: {}", s))?;
    match value {
        1 | 2 | 4 | 8 => Ok(value),
        _ => Err(format!("Reduction factor must be 1, 2, 4 or 8, got {}", value)),
    }
}

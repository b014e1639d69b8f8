use std::path::Path;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use skewmark::cli::{border_sides, threshold_tag, Baseline, Command, OutputNames, TuningArgs};
use skewmark::transform::rotate_binary_sampled;
use skewmark::{
    bit_depth, deskew, deskew_sweep, load_bitmap, BinaryImage, Bitmap, Cli, DeskewOutcome,
    DiffReport, Intermediates, SweepOutcome,
};

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Load an image that must be 1 bpp
fn load_binary(path: &Path) -> Result<BinaryImage> {
    let bitmap = load_bitmap(path)
        .with_context(|| format!("Failed to open input file: {:?}", path))?;
    let depth = bitmap.depth();
    bitmap.into_binary().with_context(|| {
        format!(
            "{:?} has {} bpp; only binary (1 bpp) images are supported",
            path, depth
        )
    })
}

fn save_binary(img: &BinaryImage, path: &Path) -> Result<()> {
    Bitmap::Binary(img.clone())
        .save(path)
        .with_context(|| format!("Failed to save output: {:?}", path))
}

fn save_intermediates(stages: &Intermediates, names: &OutputNames) -> Result<()> {
    for (img, path) in [
        (&stages.gray, names.gray_stage()),
        (&stages.smoothed, names.smoothed_stage()),
        (&stages.rotated, names.rotated_stage()),
    ] {
        Bitmap::Gray(img.clone())
            .save(&path)
            .with_context(|| format!("Failed to save intermediate: {:?}", path))?;
        eprintln!("Saved intermediate: {:?}", path);
    }
    Ok(())
}

fn write_report(
    original: &BinaryImage,
    updated: &BinaryImage,
    tag: &str,
    two_sided: bool,
    path: &Path,
) -> Result<()> {
    let report = DiffReport::from_pair(original, updated, tag, border_sides(two_sided))
        .context("Failed to diff images")?;
    report
        .write_tiff(path)
        .with_context(|| format!("Failed to write report: {:?}", path))?;

    eprintln!("Saved diff report: {:?}", path);
    eprintln!("  {}", report.summary());
    Ok(())
}

fn run_deskew(input: &Path, threshold: u8, names: &OutputNames, tuning: &TuningArgs) -> Result<()> {
    let img = load_binary(input)?;
    let config = tuning.deskew_config();

    let (corrected, estimate, intermediates) =
        match deskew(&img, threshold, &config).context("Deskew failed")? {
            DeskewOutcome::Deskewed {
                image,
                estimate,
                intermediates,
            } => (image, estimate, intermediates),
            DeskewOutcome::NotDeskewed(reason) => bail!("{}", reason),
        };
    eprintln!(
        "Skew angle (confidence): {:.3}° ({:.1})",
        estimate.angle_degrees, estimate.confidence
    );
    if let Some(stages) = &intermediates {
        save_intermediates(stages, names)?;
    }

    let deskewed_path = names.deskewed(threshold);
    save_binary(&corrected, &deskewed_path)?;
    eprintln!("Saved deskewed image: {:?}", deskewed_path);

    write_report(
        &img,
        &corrected,
        &threshold_tag(threshold),
        tuning.two_sided_markers,
        &names.deskewed_diff(threshold),
    )
}

fn run_sweep(
    input: &Path,
    thresholds: &[u8],
    baseline: Baseline,
    names: &OutputNames,
    tuning: &TuningArgs,
) -> Result<()> {
    let img = load_binary(input)?;
    let config = tuning.deskew_config();

    let (images, estimate, intermediates) =
        match deskew_sweep(&img, thresholds, &config).context("Deskew failed")? {
            SweepOutcome::Deskewed {
                images,
                estimate,
                intermediates,
            } => (images, estimate, intermediates),
            SweepOutcome::NotDeskewed(reason) => bail!("{}", reason),
        };
    eprintln!(
        "Skew angle (confidence): {:.3}° ({:.1})",
        estimate.angle_degrees, estimate.confidence
    );
    if let Some(stages) = &intermediates {
        save_intermediates(stages, names)?;
    }

    let reference = match baseline {
        Baseline::Original => img,
        Baseline::Direct => {
            let direct = rotate_binary_sampled(&img, estimate.angle_degrees.to_radians())
                .context("Direct rotation failed")?;
            let path = names.direct_baseline();
            save_binary(&direct, &path)?;
            eprintln!("Saved directly rotated baseline: {:?}", path);
            direct
        }
    };

    for (threshold, corrected) in &images {
        let path = names.swept(*threshold);
        save_binary(corrected, &path)?;
        eprintln!();
        eprintln!("Saved threshold {} image: {:?}", threshold, path);

        write_report(
            &reference,
            corrected,
            &threshold_tag(*threshold),
            tuning.two_sided_markers,
            &names.swept_diff(*threshold),
        )?;
    }

    Ok(())
}

fn output_names(input: &Path, output_dir: Option<&Path>) -> Result<OutputNames> {
    if let Some(dir) = output_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory: {:?}", dir))?;
    }
    Ok(OutputNames::new(input, output_dir))
}

fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Command::Depth { input } => {
            let depth = bit_depth(input)
                .with_context(|| format!("Failed to read bit depth: {:?}", input))?;
            println!("{}", depth);
            Ok(())
        }
        Command::Deskew {
            input,
            threshold,
            output_dir,
            tuning,
        } => {
            let names = output_names(input, output_dir.as_deref())?;
            run_deskew(input, *threshold, &names, tuning)
        }
        Command::Sweep {
            input,
            thresholds,
            baseline,
            output_dir,
            tuning,
        } => {
            let names = output_names(input, output_dir.as_deref())?;
            run_sweep(input, thresholds, *baseline, &names, tuning)
        }
        Command::Diff {
            original,
            updated,
            report,
            tag,
            two_sided_markers,
        } => {
            let original_img = load_binary(original)?;
            let updated_img = load_binary(updated)?;
            write_report(&original_img, &updated_img, tag, *two_sided_markers, report)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

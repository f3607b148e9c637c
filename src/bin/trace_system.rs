//! Optical System Trace Tool
//!
//! Loads a JSON system description, prints its surface table, traces a grid
//! of field angles and pupil positions through it and reports, per field,
//! how many rays reach the image and where their spot centroid lands.
//!
//! Usage:
//!   cargo run --bin trace_system -- [--fields N] [--pupil N] path/to/system.json

use std::path::PathBuf;
use std::time::Instant;

use clap::{ArgAction, Parser};
use ndarray::{Axis, Dimension};
use rayfield::config::SystemConfig;
use rayfield::rays::COMPONENT_AXIS;
use rayfield::system::SurfaceRow;
use rayfield::{GridAxis, Rays, System};

/// Type alias for the error type used throughout this module
type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

/// Optical System Trace Tool
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Traces a field and pupil grid through an optical system description",
    long_about = None
)]
struct Args {
    /// Field samples per axis between the extreme defined fields
    #[arg(short, long, default_value_t = 3)]
    fields: usize,

    /// Pupil samples per axis across the entrance pupil
    #[arg(short, long, default_value_t = 7)]
    pupil: usize,

    /// Configuration to report
    #[arg(short, long, default_value_t = 0)]
    configuration: usize,

    /// Print the surface table as JSON instead of text
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,

    /// JSON system description
    system: PathBuf,
}

/// Prints a section header with a title and separator line
fn print_section_header(title: &str) {
    println!("\n{}:", title);
    println!("-------------------------------------------------------");
}

fn format_thickness(t: f64) -> String {
    if t.is_finite() {
        format!("{:>10.3}", t)
    } else {
        format!("{:>10}", "inf")
    }
}

fn display_table(rows: &[SurfaceRow]) {
    print_section_header("Surfaces");
    println!(
        "{:>3}  {:<16} {:<20} {:>10}  {:>28}  {:>24}",
        "#", "name", "kind", "thickness", "origin (mm)", "tilt (deg)"
    );
    for row in rows {
        let stop = if row.is_stop { "*" } else { " " };
        println!(
            "{:>3}{} {:<16} {:<20} {}  [{:>8.3} {:>8.3} {:>8.3}]  [{:>6.2} {:>6.2} {:>6.2}]",
            row.index,
            stop,
            row.name,
            row.kind,
            format_thickness(row.thickness),
            row.origin[0],
            row.origin[1],
            row.origin[2],
            row.tilt[0],
            row.tilt[1],
            row.tilt[2],
        );
        if !row.comment.is_empty() {
            println!("      {}", row.comment);
        }
    }
}

/// Per-field count of surviving rays and their mean image position
fn display_spots(launch: &Rays, image: &Rays, config: usize) -> Result<()> {
    print_section_header("Image spots");

    let mask = image.mask();
    let mask = mask.index_axis(Axis(0), config);
    let position = image.position().index_axis(Axis(0), config);
    // Launch directions, shared by every configuration
    let field_x = launch.mean_sparse_axis(0, GridAxis::FieldX)?;
    let field_y = launch.mean_sparse_axis(0, GridAxis::FieldY)?;

    // Remaining axes: surface, wavelength, field_y, field_x, pupil_y, pupil_x
    let (ny, nx) = (mask.shape()[2], mask.shape()[3]);
    let px = position.index_axis(Axis(COMPONENT_AXIS - 1), 0);
    let py = position.index_axis(Axis(COMPONENT_AXIS - 1), 1);

    let mut total = vec![vec![0usize; nx]; ny];
    let mut count = vec![vec![0usize; nx]; ny];
    let mut sum = vec![vec![[0.0_f64; 2]; nx]; ny];
    for (idx, &valid) in mask.indexed_iter() {
        let i = idx.slice();
        let (iy, ix) = (i[2], i[3]);
        total[iy][ix] += 1;
        if valid {
            count[iy][ix] += 1;
            sum[iy][ix][0] += px[i];
            sum[iy][ix][1] += py[i];
        }
    }

    println!(
        "{:>10} {:>10}  {:>9}  {:>12} {:>12}",
        "launch dx", "launch dy", "rays", "x (mm)", "y (mm)"
    );
    for iy in 0..ny {
        for ix in 0..nx {
            let n = count[iy][ix];
            let centroid = if n > 0 {
                let [sx, sy] = sum[iy][ix];
                format!("{:>12.6} {:>12.6}", sx / n as f64, sy / n as f64)
            } else {
                format!("{:>12} {:>12}", "-", "-")
            };
            println!(
                "{:>10.6} {:>10.6}  {:>4}/{:<4}  {}",
                field_x[ix], field_y[iy], n, total[iy][ix], centroid
            );
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    println!("Loading optical system: {}", args.system.display());
    println!("-------------------------------------------------------");

    let start_time = Instant::now();
    let config = SystemConfig::from_file(&args.system)?;
    let system: System = config.build()?;
    println!("System '{}' with {} surfaces", system.name, system.len());
    if !system.comment.is_empty() {
        println!("{}", system.comment);
    }
    println!("Configurations: {}", system.config_len()?);

    let rows = system.table(args.configuration)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        display_table(&rows);
    }

    let rays = system.field_rays(args.fields, args.pupil)?;
    let image = system.raytrace_final(&rays)?;
    display_spots(&rays, &image, args.configuration)?;

    println!("\nTotal trace time: {:.2?}", start_time.elapsed());
    Ok(())
}

use clap::Parser;
use dng_decode::ifd::{Ifd, IfdValue};
use dng_decode::{load_dng_file, DecodedImage};
use std::process::ExitCode;
use tracing_subscriber::prelude::*;

/// Decode a DNG file and print its images, their metadata and everything that was skipped
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// input file to decode
    file: String,
    /// also print the full IFD tree with tag names
    #[arg(short = 't', long, action)]
    tags: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::builder().from_env_lossy())
        .with(tracing_subscriber::fmt::Layer::default().compact())
        .init();

    let args = Args::parse();
    let result = match load_dng_file(&args.file) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("could not decode {}: {e}", args.file);
            return ExitCode::FAILURE;
        }
    };

    println!("{} ({:?} endian, {:?})", args.file, result.endian, result.file_type);
    for image in &result.images {
        print_image(image);
    }
    for diagnostic in &result.diagnostics {
        println!("skipped {diagnostic}");
    }
    if args.tags {
        for ifd in &result.ifds {
            print_ifd(ifd);
        }
    }
    ExitCode::SUCCESS
}

fn print_image(image: &DecodedImage) {
    let d = &image.descriptor;
    println!(
        "{}: {}x{}x{} at {:?} bits, {}, {:?}, {:?}",
        d.path,
        d.width,
        d.height,
        d.samples_per_pixel,
        d.bits_per_sample,
        d.compression,
        d.subfile_kind,
        d.planar_configuration,
    );
    println!("  black level {:?}, white level {:?}", d.black_level, d.white_level);
    println!("  orientation {}", d.orientation);
    let m = &d.metadata;
    if let (Some(dim), Some(pattern)) = (m.cfa_repeat_pattern_dim, &m.cfa_pattern) {
        println!("  CFA {}x{} {:?}", dim[0], dim[1], pattern);
    }
    if let Some(model) = &m.unique_camera_model {
        println!("  camera {model}");
    }
    for (name, matrix) in [
        ("color matrix 1", &m.color_matrix1),
        ("color matrix 2", &m.color_matrix2),
        ("forward matrix 1", &m.forward_matrix1),
        ("forward matrix 2", &m.forward_matrix2),
    ] {
        if let Some(matrix) = matrix {
            let rows: Vec<String> = matrix
                .chunks(3)
                .map(|row| {
                    row.iter()
                        .map(|v| format!("{v:>9.4}"))
                        .collect::<Vec<_>>()
                        .join(" ")
                })
                .collect();
            println!("  {name}:\n{}", textwrap::indent(&rows.join("\n"), "    "));
        }
    }
}

fn print_ifd(ifd: &Ifd) {
    for (path, entry) in ifd.flat_entries() {
        match &entry.value {
            IfdValue::Ifd(_) => {}
            IfdValue::List(list) if list.iter().any(|v| matches!(v, IfdValue::Ifd(_))) => {}
            value => println!("{path}.{}: {value}", entry.tag),
        }
    }
}

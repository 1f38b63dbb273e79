//! Clean one image with the library API and report what was found.
//!
//! ```sh
//! cargo run --example purify -- photo.jpg cleaned.png
//! ```

use std::path::PathBuf;
use std::process;

use image_purifier::{detect_background_color, detection, inpaint, segment};

fn main() {
    env_logger::init();

    let mut args = std::env::args_os().skip(1).map(PathBuf::from);
    let (Some(input), Some(output)) = (args.next(), args.next()) else {
        eprintln!("usage: purify <input> <output.png>");
        process::exit(2);
    };

    let mut img = match image::open(&input) {
        Ok(img) => img.into_rgba8(),
        Err(e) => {
            eprintln!("cannot read {}: {e}", input.display());
            process::exit(1);
        }
    };

    for candidate in detection::score_candidates(&img) {
        println!(
            "{:?}: edge density {:.4}{}",
            candidate.kind,
            candidate.score,
            if candidate.passes() { " (marked)" } else { "" }
        );
    }
    let regions = detection::locate(&img, false);
    for r in &regions {
        println!("inpainting {}x{} at ({}, {})", r.width, r.height, r.x, r.y);
    }
    inpaint::remove_in_place(&mut img, &regions);

    let background = detect_background_color(&img);
    let mask = segment::remove_color_background(&mut img, &background);
    println!(
        "background {background}: {:.1}% removed",
        mask.coverage() * 100.0
    );

    if let Err(e) = img.save(&output) {
        eprintln!("cannot write {}: {e}", output.display());
        process::exit(1);
    }
    println!("wrote {}", output.display());
}

extern crate sgm_tune as st;

use st::io::save_preview;
use st::{compute_disparity, read_image, StereoPair, StereoParams};

pub fn main() -> st::Result<()> {
    let mut args = std::env::args().skip(1);
    let left = args.next().unwrap_or_else(|| "demos/left.png".to_string());
    let right = args.next().unwrap_or_else(|| "demos/right.png".to_string());

    let limg = read_image(&left)?;
    let rimg = read_image(&right)?;
    let pair = StereoPair::from_images(&limg, &rimg)?;
    let params = StereoParams {
        num_disparities: 32,
        ..StereoParams::default()
    };
    let disp = compute_disparity(&pair, &params)?;

    save_preview("demos/disp.png", &disp, params.unmatched_disparity())
}

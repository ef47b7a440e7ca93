//! Mirrors a set of lines onto the emulated device, updates every point's
//! data in a kernel, and prints the synced-back state.

use device_mirror::{
    api::LaunchConfig,
    emulated::EmulatedDevice,
    error::DeviceResult,
    mirror::MirroredOnHost,
    model::{update_point_data, Line, LineSet},
};

const LINES: usize = 3;
const PLAIN_POINTS: usize = 3;
const GAUSS_POINTS: usize = 2;
const DATA_LEN: usize = 5;

fn build_set() -> LineSet {
    let mut lines = Vec::with_capacity(LINES);
    for id in 0..LINES {
        #[expect(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
        let mut line = Line::with_layout(id as i32, PLAIN_POINTS, GAUSS_POINTS, DATA_LEN);
        #[expect(clippy::cast_precision_loss)]
        for (index, point) in line.points_mut().iter_mut().enumerate() {
            point.set_coords(id as f32, index as f32, 0.0);
        }
        lines.push(line);
    }
    LineSet::new(lines)
}

fn print_set(set: &LineSet) {
    for line in set.lines() {
        println!(
            "line {} ({} plain, {} gauss):",
            line.id(),
            line.plain_points(),
            line.points().len() - line.plain_points()
        );
        for point in line.points() {
            match point.weight() {
                Some(weight) => println!(
                    "  gauss point {} (weight {weight}): coords {:?} data {:?}",
                    point.id(),
                    point.coords(),
                    point.data()
                ),
                None => println!(
                    "  point {}: coords {:?} data {:?}",
                    point.id(),
                    point.coords(),
                    point.data()
                ),
            }
        }
    }
}

#[expect(clippy::cast_possible_truncation)]
fn main() -> DeviceResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let device = EmulatedDevice::new();
    let set = build_set();

    println!("before:");
    print_set(&set);

    let mut on_device = MirroredOnHost::new(set, &device).move_to_device()?;
    tracing::info!(
        outstanding = device.outstanding(),
        bytes = device.bytes_in_use(),
        "set attached on device"
    );

    on_device.launch(
        LaunchConfig::new(LINES as u32, (PLAIN_POINTS + GAUSS_POINTS) as u32),
        update_point_data(),
    )?;

    let on_host = on_device.move_to_host()?;

    println!("after:");
    print_set(&on_host);

    tracing::info!(
        outstanding = device.outstanding(),
        faults = device.faults(),
        "device released"
    );

    Ok(())
}

use std::path::Path;

use clap::Parser;
use log::{error, info};

use neuracast::accel::BvhAccel;
use neuracast::cli::Args;
use neuracast::dataset::{DatasetSynthesizer, LABEL_WIDTH};
use neuracast::logger::init_logger;
use neuracast::model::{Mlp, OptimizerConfig, SurrogateModel, TrainConfig};
use neuracast::output::{save_color_png, save_depth_exr, send_image_to_tev};
use neuracast::renderer::{RenderPresets, Renderer};

fn main() {
    let args = Args::parse();

    init_logger(args.debug_level.clone().into());

    // Log application startup with version information
    info!("Neuracast - Git Version {} ({})", env!("GIT_HASH"), env!("GIT_DATE"));
    info!(
        "image resolution: {}x{}, {} samples per ray",
        args.width, args.height, args.samples_per_ray
    );

    let mut renderer = Renderer::new(Box::new(BvhAccel::new()));
    renderer.set_viewport(args.width, args.height);
    renderer.set_presets(RenderPresets {
        measure_overhead: args.measure_overhead,
        bounds_margin: args.bounds_margin,
        samples_per_ray: args.samples_per_ray,
    });

    info!("loading scene '{}'", args.scene);
    if let Err(e) = renderer.load_scene(Path::new(&args.scene)) {
        error!("can't load scene '{}': {}", args.scene, e);
        std::process::exit(1);
    }

    let should_send_to_tev = args.tev || args.tev_address.is_some();
    let tev_address = args.tev_address.as_deref().unwrap_or("localhost:14158");

    // Reference pass: per-pixel nearest-hit queries in tile order.
    let (color, depth) = renderer.cast_block();
    save_color_png(
        &color,
        args.width,
        args.height,
        &format!("{}_reference.png", args.output),
    );
    save_depth_exr(
        &depth,
        args.width,
        args.height,
        &format!("{}_depth.exr", args.output),
    );
    if should_send_to_tev {
        send_image_to_tev(&color, args.width, args.height, "reference", tev_address);
    }

    if args.measure_overhead {
        info!("overhead measurement finished, skipping surrogate pipeline");
        return;
    }

    // Dataset synthesis against the committed structure.
    let synthesizer = DatasetSynthesizer::new(
        renderer.accel(),
        renderer.expanded_bounds(),
        args.seed,
    );
    let (inputs, labels) =
        synthesizer.generate(args.points, args.rays_per_point, args.samples_per_ray);

    // Surrogate training.
    let mut model = Mlp::new(
        args.samples_per_ray * 3,
        LABEL_WIDTH,
        args.hidden_width,
        args.hidden_layers,
        args.frequencies,
        args.seed,
    );
    let config = TrainConfig {
        batch_size: args.batch_size,
        iterations: args.train_iterations,
        optimizer: OptimizerConfig {
            learning_rate: args.learning_rate,
            ..OptimizerConfig::default()
        },
        loss: args.loss.clone().into(),
    };
    info!(
        "training surrogate: {} iterations, batch size {}",
        config.iterations, config.batch_size
    );
    let train_start = std::time::Instant::now();
    model.train(&inputs, &labels, &config);
    info!("surrogate trained in {:.2?}", train_start.elapsed());

    // Surrogate pass: one batched evaluation for the whole image.
    let (surrogate_color, surrogate_depth) = renderer.render_via_model(&model);
    save_color_png(
        &surrogate_color,
        args.width,
        args.height,
        &format!("{}_surrogate.png", args.output),
    );
    save_depth_exr(
        &surrogate_depth,
        args.width,
        args.height,
        &format!("{}_surrogate_depth.exr", args.output),
    );
    if should_send_to_tev {
        send_image_to_tev(
            &surrogate_color,
            args.width,
            args.height,
            "surrogate",
            tev_address,
        );
    }
}

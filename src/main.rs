mod app;

use app::PadbusApp;
use padbus::EngineConfig;

fn main() -> eframe::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = EngineConfig::load().unwrap_or_default();

    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([520.0, 420.0])
            .with_min_inner_size([360.0, 280.0])
            .with_minimized(config.start_minimized)
            .with_title("padbus"),
        ..Default::default()
    };

    eframe::run_native(
        "padbus",
        native_options,
        Box::new(move |cc| Ok(Box::new(PadbusApp::new(cc, config)))),
    )
}

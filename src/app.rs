use eframe::egui;
use padbus::bus::DeviceNodeTransport;
use padbus::input::{GilrsSource, HotplugEvent};
use padbus::{Engine, EngineConfig, EngineStatus};
use std::sync::Arc;
use std::time::Duration;

pub struct PadbusApp {
    config: EngineConfig,
    source: Option<Arc<GilrsSource>>,
    engine: Option<Arc<Engine>>,

    // UI state
    status: Option<EngineStatus>,
    status_message: String,
}

impl PadbusApp {
    pub fn new(cc: &eframe::CreationContext<'_>, config: EngineConfig) -> Self {
        let fonts = egui::FontDefinitions::default();
        cc.egui_ctx.set_fonts(fonts);

        let source = match GilrsSource::start(config.mapping_path(), config.poll_interval()) {
            Ok(source) => Some(Arc::new(source)),
            Err(e) => {
                log::error!("Failed to initialize input source: {}", e);
                None
            }
        };

        let engine = source.as_ref().map(|source| {
            let transport = Arc::new(DeviceNodeTransport::new(config.bus_path()));
            let engine = Arc::new(Engine::new(source.clone(), transport, config.engine_options()));
            engine.reconcile();
            engine
        });

        let mut app = Self {
            config,
            source,
            engine,
            status: None,
            status_message: String::new(),
        };

        if app.engine.is_none() {
            app.status_message = "No input backend available".to_string();
        } else if app.config.start_on_startup {
            app.start();
        }
        app.refresh_status();
        app
    }

    fn start(&mut self) {
        let Some(ref engine) = self.engine else {
            return;
        };
        match engine.start() {
            Ok(()) => self.status_message.clear(),
            Err(e) => {
                self.status_message = format!("Failed to start: {}", e);
                log::error!("{}", self.status_message);
            }
        }
    }

    fn stop(&mut self) {
        if let Some(ref engine) = self.engine {
            if let Err(e) = engine.stop() {
                log::error!("Failed to stop engine: {}", e);
            }
        }
    }

    fn save_config(&mut self) {
        if let Err(e) = self.config.save() {
            self.status_message = format!("Failed to save config: {}", e);
            log::error!("{}", self.status_message);
        }
    }

    /// Reconciles once per frame that saw hot-plug traffic.
    fn process_hotplug(&mut self) {
        let (Some(source), Some(engine)) = (&self.source, &self.engine) else {
            return;
        };

        let mut changed = false;
        for event in source.hotplug_events().try_iter() {
            match event {
                HotplugEvent::Connected { guid, name } => {
                    log::info!("Controller connected: {} ({})", name, guid);
                }
                HotplugEvent::Disconnected { guid } => {
                    log::info!("Controller disconnected: {}", guid);
                }
            }
            changed = true;
        }

        if changed {
            engine.reconcile();
        }
    }

    fn refresh_status(&mut self) {
        self.status = self.engine.as_ref().map(|e| e.status());
    }

    fn render_top_panel(&mut self, ctx: &egui::Context) {
        let running = self.status.as_ref().is_some_and(|s| s.running);

        egui::TopBottomPanel::top("top_panel").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.heading("padbus");
                ui.separator();

                let label = if running { "Stop" } else { "Start" };
                if ui
                    .add_enabled(self.engine.is_some(), egui::Button::new(label))
                    .clicked()
                {
                    if running {
                        self.stop();
                    } else {
                        self.start();
                    }
                }

                if ui
                    .add_enabled(self.engine.is_some(), egui::Button::new("Rescan"))
                    .clicked()
                {
                    if let Some(ref engine) = self.engine {
                        engine.reconcile();
                    }
                }

                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    let status = if running {
                        egui::RichText::new("Running").color(egui::Color32::GREEN)
                    } else {
                        egui::RichText::new("Stopped").color(egui::Color32::RED)
                    };
                    ui.label(status);
                });
            });
        });
    }

    fn render_options(&mut self, ui: &mut egui::Ui, running: bool) {
        ui.group(|ui| {
            ui.label("Options");

            let mut exclusive = self.config.exclusive_mode;
            let response = ui
                .add_enabled(!running, egui::Checkbox::new(&mut exclusive, "Exclusive mode"))
                .on_disabled_hover_text("Stop the engine to change this");
            if response.changed() {
                self.config.exclusive_mode = exclusive;
                if let Some(ref engine) = self.engine {
                    engine.set_exclusive(exclusive);
                }
                self.save_config();
            }

            if ui
                .checkbox(&mut self.config.start_on_startup, "Start on startup")
                .changed()
            {
                self.save_config();
            }
            if ui
                .checkbox(&mut self.config.start_minimized, "Start minimized")
                .changed()
            {
                self.save_config();
            }
        });
    }

    fn render_slots(&mut self, ui: &mut egui::Ui) {
        let Some(status) = self.status.clone() else {
            return;
        };

        ui.heading("Controllers");
        ui.add_space(5.0);

        if status.slots.is_empty() {
            ui.label("No controllers detected");
            return;
        }

        egui::Grid::new("slots").striped(true).show(ui, |ui| {
            ui.label(egui::RichText::new("Slot").strong());
            ui.label(egui::RichText::new("Device").strong());
            ui.label(egui::RichText::new("Enabled").strong());
            ui.label(egui::RichText::new("Forwarding").strong());
            ui.label(egui::RichText::new("Failures").strong());
            ui.end_row();

            for slot in &status.slots {
                ui.label(slot.index.to_string());
                ui.label(&slot.name).on_hover_text(slot.guid.to_string());

                let mut enabled = slot.enabled;
                if ui.checkbox(&mut enabled, "").changed() {
                    if let Some(ref engine) = self.engine {
                        if let Err(e) = engine.set_slot_enabled(slot.index, enabled) {
                            self.status_message = e.to_string();
                        }
                    }
                }

                let forwarding = if slot.active {
                    egui::RichText::new("yes").color(egui::Color32::GREEN)
                } else {
                    egui::RichText::new("no").color(egui::Color32::DARK_GRAY)
                };
                ui.label(forwarding);
                ui.label(slot.report_failures.to_string());
                ui.end_row();
            }
        });
    }

    fn render_central_panel(&mut self, ctx: &egui::Context) {
        let running = self.status.as_ref().is_some_and(|s| s.running);

        egui::CentralPanel::default().show(ctx, |ui| {
            if !self.status_message.is_empty() {
                ui.label(egui::RichText::new(&self.status_message).color(egui::Color32::YELLOW));
                ui.add_space(10.0);
            }

            self.render_options(ui, running);
            ui.add_space(10.0);
            self.render_slots(ui);

            if let Some(ref status) = self.status {
                ui.add_space(10.0);
                ui.separator();
                ui.horizontal(|ui| {
                    ui.label(format!("Plugged: {}", status.plugged_count));
                    ui.separator();
                    ui.label(format!("Bus failures: {}", status.channel_failures));
                    ui.separator();
                    ui.label(format!("Slots: {}", status.slot_count));
                });
            }
        });
    }
}

impl eframe::App for PadbusApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.process_hotplug();
        self.refresh_status();

        self.render_top_panel(ctx);
        self.render_central_panel(ctx);

        ctx.request_repaint_after(Duration::from_millis(100));
    }
}

impl Drop for PadbusApp {
    fn drop(&mut self) {
        self.stop();
    }
}

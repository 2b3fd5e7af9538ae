use crate::settings::{
    RenderSettings, MAX_DISPERSION, MAX_DISPERSION_SAMPLES, MAX_GLASS_ABSORPTION,
    MAX_INDEX_OF_REFRACTION, MAX_SHADOW_PCF, MAX_SPHERE_REFLECTION_BLUR,
};

/// Ring cube toggles per row.
const CUBES_PER_ROW: usize = 8;

/// The settings window. `max_recursion_depth` is the pipeline's limit.
pub fn settings_window(
    ctx: &egui::Context,
    settings: &mut RenderSettings,
    max_recursion_depth: u32,
) {
    egui::Window::new("Settings")
        .default_pos([10.0, 10.0])
        .auto_sized()
        .show(ctx, |ui| settings_ui(ui, settings, max_recursion_depth));
}

pub fn settings_ui(ui: &mut egui::Ui, settings: &mut RenderSettings, max_recursion_depth: u32) {
    ui.checkbox(&mut settings.animate, "Animate");
    ui.label("Use WASD to move camera");
    ui.add(egui::Slider::new(&mut settings.shadow_pcf, 0..=MAX_SHADOW_PCF).text("Shadow blur"));
    ui.add(
        egui::Slider::new(&mut settings.max_recursion, 0..=max_recursion_depth)
            .text("Max recursion"),
    );

    for (row_index, row) in settings.enable_cubes.chunks_mut(CUBES_PER_ROW).enumerate() {
        ui.horizontal(|ui| {
            for (i, enabled) in row.iter_mut().enumerate() {
                let cube = row_index * CUBES_PER_ROW + i + 1;
                ui.checkbox(enabled, format!("Cube {}", cube));
            }
        });
    }

    ui.separator();
    ui.label("Glass cube");
    ui.checkbox(&mut settings.glass_enable_dispersion, "Dispersion");
    ui.add(
        egui::Slider::new(
            &mut settings.glass_index_of_refraction,
            1.0..=MAX_INDEX_OF_REFRACTION,
        )
        .text("Index of refraction"),
    );
    if settings.glass_enable_dispersion {
        ui.add(
            egui::Slider::new(&mut settings.dispersion_factor, 0.0..=MAX_DISPERSION)
                .text("Dispersion factor"),
        );

        let mut exponent = settings.dispersion_sample_count.max(1).trailing_zeros();
        ui.add(
            egui::Slider::new(&mut exponent, 1..=MAX_DISPERSION_SAMPLES.trailing_zeros())
                .text("Dispersion samples")
                .custom_formatter(|value, _| format!("{}", 1u32 << value as u32)),
        );
        settings.dispersion_sample_count = 1 << exponent;
    }
    ui.horizontal(|ui| {
        ui.color_edit_button_rgb(&mut settings.glass_reflection_color_mask);
        ui.label("Reflection color");
    });
    ui.horizontal(|ui| {
        ui.color_edit_button_rgb(&mut settings.glass_material_color);
        ui.label("Material color");
    });
    ui.add(
        egui::Slider::new(&mut settings.glass_absorption, 0.0..=MAX_GLASS_ABSORPTION)
            .text("Absorption"),
    );

    ui.separator();
    ui.label("Sphere");
    ui.add(
        egui::Slider::new(
            &mut settings.sphere_reflection_blur,
            1..=MAX_SPHERE_REFLECTION_BLUR,
        )
        .text("Reflection blur"),
    );
    ui.horizontal(|ui| {
        ui.color_edit_button_rgb(&mut settings.sphere_reflection_color_mask);
        ui.label("Color mask");
    });
}

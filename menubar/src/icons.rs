//! Procedurally drawn tray icons.
//!
//! A five-bar waveform glyph rendered into an RGBA buffer, tinted per
//! state. Drawing in code keeps the crate free of binary assets.

const SIZE: u32 = 32;
/// Bar heights of the waveform glyph, in pixels.
const BARS: [u32; 5] = [10, 18, 26, 18, 10];
const BAR_WIDTH: u32 = 4;
const BAR_GAP: u32 = 2;

/// Render the waveform glyph in the given color.
pub fn waveform_icon(color: [u8; 4]) -> tray_icon::Icon {
    let mut rgba = vec![0u8; (SIZE * SIZE * 4) as usize];

    let total_width = BARS.len() as u32 * BAR_WIDTH + (BARS.len() as u32 - 1) * BAR_GAP;
    let left = (SIZE - total_width) / 2;

    for (index, bar_height) in BARS.iter().enumerate() {
        let x0 = left + index as u32 * (BAR_WIDTH + BAR_GAP);
        let y0 = (SIZE - bar_height) / 2;
        for y in y0..y0 + bar_height {
            for x in x0..x0 + BAR_WIDTH {
                let offset = ((y * SIZE + x) * 4) as usize;
                rgba[offset..offset + 4].copy_from_slice(&color);
            }
        }
    }

    tray_icon::Icon::from_rgba(rgba, SIZE, SIZE).expect("valid RGBA icon data")
}

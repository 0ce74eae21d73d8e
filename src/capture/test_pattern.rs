//! Synthetic frame source used by the daemon when no capture backend is
//! attached: a letterboxed hue sweep that drifts around the screen.

/// Generates RGB frames into a reused buffer.
pub struct TestPattern {
    width: usize,
    height: usize,
    bar: usize,
    phase: f32,
    buffer: Vec<u8>,
}

impl TestPattern {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            bar: height / 8,
            phase: 0.0,
            buffer: vec![0; width * height * 3],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Advance by `step` turns of the color wheel and render the next frame.
    pub fn next_frame(&mut self, step: f32) -> &[u8] {
        self.phase = (self.phase + step).fract();
        let (w, h, bar) = (self.width, self.height, self.bar);
        for y in 0..h {
            for x in 0..w {
                let i = (y * w + x) * 3;
                if y < bar || y >= h - bar {
                    self.buffer[i..i + 3].fill(0);
                    continue;
                }
                let hue = (self.phase + x as f32 / w as f32 * 0.5 + y as f32 / h as f32 * 0.5).fract();
                self.buffer[i..i + 3].copy_from_slice(&hue_to_rgb(hue));
            }
        }
        &self.buffer
    }
}

fn hue_to_rgb(hue: f32) -> [u8; 3] {
    let h = hue * 6.0;
    let x = 1.0 - (h % 2.0 - 1.0).abs();
    let (r, g, b) = match h as u32 {
        0 => (1.0, x, 0.0),
        1 => (x, 1.0, 0.0),
        2 => (0.0, 1.0, x),
        3 => (0.0, x, 1.0),
        4 => (x, 0.0, 1.0),
        _ => (1.0, 0.0, x),
    };
    [(r * 255.0) as u8, (g * 255.0) as u8, (b * 255.0) as u8]
}

// src/export/frame.rs

/// One packed, top-down RGB24 picture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
}

impl VideoFrame {
    pub fn solid(width: u32, height: u32, color: [u8; 3]) -> Self {
        let rgb = color
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 3)
            .collect();
        Self { width, height, rgb }
    }

    /// Crops or pads (black) to exactly `width` x `height`.
    pub fn fitted(&self, width: u32, height: u32) -> VideoFrame {
        if self.width == width && self.height == height && self.rgb.len() == (width * height * 3) as usize {
            return self.clone();
        }
        let (w, h) = (width as usize, height as usize);
        let src_w = self.width as usize;
        let mut rgb = vec![0u8; w * h * 3];
        for y in 0..h.min(self.height as usize) {
            let cols = w.min(src_w);
            let src = &self.rgb[(y * src_w * 3).min(self.rgb.len())..];
            let n = (cols * 3).min(src.len());
            rgb[y * w * 3..][..n].copy_from_slice(&src[..n]);
        }
        VideoFrame { width, height, rgb }
    }
}

/// External producer of the picture captured alongside the mix.
pub trait VisualFrameSource: Send {
    /// Size of every frame of this export.
    fn dimensions(&self) -> (u32, u32);

    /// The picture currently on screen.
    fn current_frame(&mut self) -> VideoFrame;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fitted_crops_and_pads() {
        let frame = VideoFrame::solid(2, 2, [9, 8, 7]);
        let bigger = frame.fitted(3, 1);
        assert_eq!(bigger.rgb, vec![9, 8, 7, 9, 8, 7, 0, 0, 0]);
        let same = frame.fitted(2, 2);
        assert_eq!(same, frame);
    }
}
